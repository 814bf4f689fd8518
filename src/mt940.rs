//! Minimal MT940 bank-statement parser.
//!
//! Covers the tag subset Swiss bank exports actually use: `:20:`, `:25:`,
//! `:60F:`, `:61:`, `:62F:` and `:86:` with continuation lines. Statement
//! lines carry the raw `:86:` text and the supplementary details so bank
//! specific importers can apply their own narration cleanup.

use crate::error::{ImportError, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use std::io::BufRead;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct Mt940Transaction {
    /// Value date from `:61:`.
    pub date: NaiveDate,
    /// Booking date when the optional MMDD field is present.
    pub entry_date: Option<NaiveDate>,
    /// Signed amount, debits negative.
    pub amount: Decimal,
    pub currency: String,
    /// Customer reference ahead of the `//` separator; `NONREF` dropped.
    pub customer_reference: Option<String>,
    /// Bank reference after the `//` separator.
    pub bank_reference: Option<String>,
    /// Joined `:86:` information lines.
    pub transaction_details: String,
    /// Supplementary details from the `:61:` continuation line.
    pub extra_details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mt940Balance {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mt940Statement {
    pub statement_id: Option<String>,
    pub account_id: String,
    pub opening_balance: Option<Mt940Balance>,
    pub closing_balance: Option<Mt940Balance>,
    pub transactions: Vec<Mt940Transaction>,
}

fn line_61_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^:61:(?P<val>\d{6})(?P<book>\d{4})?(?P<dc>R?[CD])(?P<ccy>[A-Z])?(?P<amt>\d+,\d{0,2})(?P<code>[A-Z][A-Z0-9]{3})(?P<rest>.*)$",
        )
        .expect("valid :61: regex")
    })
}

fn parse_mt_date(yymmdd: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(yymmdd, "%y%m%d")
        .map_err(|e| ImportError::Parse(format!("bad MT940 date {yymmdd}: {e}")))
}

fn parse_entry_date(value_year: i32, mmdd: &str) -> Result<NaiveDate> {
    let month: u32 = mmdd[..2]
        .parse()
        .map_err(|_| ImportError::Parse(format!("bad entry date {mmdd}")))?;
    let day: u32 = mmdd[2..]
        .parse()
        .map_err(|_| ImportError::Parse(format!("bad entry date {mmdd}")))?;
    NaiveDate::from_ymd_opt(value_year, month, day)
        .ok_or_else(|| ImportError::Parse(format!("bad entry date {mmdd}")))
}

fn parse_amount(comma_amount: &str) -> Result<Decimal> {
    comma_amount
        .replace(',', ".")
        .parse()
        .map_err(|e| ImportError::Parse(format!("bad MT940 amount {comma_amount}: {e}")))
}

fn parse_balance(tail: &str) -> Result<Mt940Balance> {
    // e.g. C240131CHF1100,00 or D...
    if tail.len() < 11 || !tail.is_ascii() {
        return Err(ImportError::Parse(format!("bad MT940 balance {tail}")));
    }
    let sign = match &tail[..1] {
        "C" => Decimal::ONE,
        "D" => -Decimal::ONE,
        other => return Err(ImportError::Parse(format!("bad balance sign {other}"))),
    };
    let date = parse_mt_date(&tail[1..7])?;
    let currency = tail[7..10].to_string();
    let amount = sign * parse_amount(&tail[10..])?;
    Ok(Mt940Balance {
        date,
        amount,
        currency,
    })
}

/// Section of the message the current continuation line belongs to.
enum Section {
    None,
    Statement,
    Details,
}

pub fn parse<R: BufRead>(reader: R) -> Result<Mt940Statement> {
    let mut statement = Mt940Statement::default();
    let mut section = Section::None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line == "-" {
            continue;
        }

        if let Some(id) = line.strip_prefix(":20:") {
            statement.statement_id = Some(id.trim().to_string());
            section = Section::None;
        } else if let Some(account) = line.strip_prefix(":25:") {
            statement.account_id = account.trim().to_string();
            section = Section::None;
        } else if let Some(tail) = line.strip_prefix(":60F:") {
            statement.opening_balance = Some(parse_balance(tail)?);
            section = Section::None;
        } else if let Some(tail) = line.strip_prefix(":62F:") {
            statement.closing_balance = Some(parse_balance(tail)?);
            section = Section::None;
        } else if line.starts_with(":61:") {
            let caps = line_61_regex()
                .captures(line)
                .ok_or_else(|| ImportError::Parse(format!("unparseable :61: line: {line}")))?;

            let value_date = parse_mt_date(&caps["val"])?;
            let entry_date = caps
                .name("book")
                .map(|m| parse_entry_date(value_date.year(), m.as_str()))
                .transpose()?;

            let mut amount = parse_amount(&caps["amt"])?;
            if caps["dc"].ends_with('D') {
                amount = -amount;
            }

            let currency = statement
                .opening_balance
                .as_ref()
                .map(|bal| bal.currency.clone())
                .unwrap_or_default();

            // customer reference up to "//", bank reference after it
            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
            let (customer, bank) = match rest.split_once("//") {
                Some((customer, bank)) => (customer, Some(bank)),
                None => (rest, None),
            };
            let customer_reference = Some(customer.trim().to_string())
                .filter(|r| !r.is_empty() && r != "NONREF");
            let bank_reference = bank
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());

            statement.transactions.push(Mt940Transaction {
                date: value_date,
                entry_date,
                amount,
                currency,
                customer_reference,
                bank_reference,
                transaction_details: String::new(),
                extra_details: String::new(),
            });
            section = Section::Statement;
        } else if let Some(details) = line.strip_prefix(":86:") {
            if let Some(last) = statement.transactions.last_mut() {
                last.transaction_details.push_str(details);
                section = Section::Details;
            }
        } else if !line.starts_with(':') {
            match section {
                Section::Details => {
                    if let Some(last) = statement.transactions.last_mut() {
                        last.transaction_details.push('\n');
                        last.transaction_details.push_str(line);
                    }
                }
                Section::Statement => {
                    if let Some(last) = statement.transactions.last_mut() {
                        if !last.extra_details.is_empty() {
                            last.extra_details.push(' ');
                        }
                        last.extra_details.push_str(line.trim());
                    }
                }
                Section::None => {}
            }
        }
    }

    Ok(statement)
}
