//! ZKB MT940 statements. Purely cosmetic narration cleanup: the booking
//! text repeats boilerplate that buries the actual counterparty.

use crate::mt940::Mt940Transaction;
use regex::Regex;
use std::sync::OnceLock;

use super::mt940_base::Mt940Formatter;

static EXTRA_REPLACEMENTS: &[(&str, &str)] = &[
    (r"Einkauf ZKB Maestro Karte", ""),
    (r"LSV:.*", "LSV"),
    (r"Gutschrift:.*", "Gutschrift"),
    (r"eBanking:.*", "eBanking"),
    (r"eBanking Mobile:.*", "eBanking Mobile"),
    (r"E-Rechnung:.*", "E-Rechnung"),
    (r"Kontouebertrag:.*", "Kontouebertrag:"),
];

static DETAILS_REPLACEMENTS: &[(&str, &str)] = &[(r"\?ZI:\?9:1", "")];

fn compiled(table: &'static [(&str, &str)], cell: &'static OnceLock<Vec<(Regex, &'static str)>>) -> &'static [(Regex, &'static str)] {
    cell.get_or_init(|| {
        table
            .iter()
            .map(|(pattern, replacement)| {
                (
                    Regex::new(pattern).expect("valid replacement regex"),
                    *replacement,
                )
            })
            .collect()
    })
}

fn apply(text: &str, table: &[(Regex, &str)]) -> String {
    let mut result = text.to_string();
    for (regex, replacement) in table {
        result = regex.replace_all(&result, *replacement).into_owned();
    }
    result
}

pub struct ZkbFormatter;

impl Mt940Formatter for ZkbFormatter {
    fn narration(&self, trx: &Mt940Transaction) -> String {
        static EXTRA: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
        static DETAILS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

        let extra = apply(&trx.extra_details, compiled(EXTRA_REPLACEMENTS, &EXTRA));
        let details = apply(
            &trx.transaction_details,
            compiled(DETAILS_REPLACEMENTS, &DETAILS),
        );

        let extra = extra.trim();
        if extra.is_empty() {
            details
        } else {
            format!("{extra}: {details}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn trx(details: &str, extra: &str) -> Mt940Transaction {
        Mt940Transaction {
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            entry_date: None,
            amount: Decimal::ONE,
            currency: "CHF".to_string(),
            customer_reference: None,
            bank_reference: None,
            transaction_details: details.to_string(),
            extra_details: extra.to_string(),
        }
    }

    #[test]
    fn maestro_boilerplate_is_dropped() {
        let narration = ZkbFormatter.narration(&trx("COOP PRONTO", "Einkauf ZKB Maestro Karte"));
        assert_eq!(narration, "COOP PRONTO");
    }

    #[test]
    fn transfer_kinds_are_condensed() {
        let narration = ZkbFormatter.narration(&trx("ACME AG?ZI:?9:1", "LSV: 2024-02-01 batch 7"));
        assert_eq!(narration, "LSV: ACME AG");
    }
}
