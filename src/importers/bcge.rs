//! BCGE MT940 statements.

use crate::mt940::Mt940Transaction;
use regex::Regex;
use std::sync::OnceLock;

use super::mt940_base::Mt940Formatter;

fn strip_newlines(text: &str) -> String {
    text.replace(['\n', '\r'], "")
}

fn ordp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ORDP/(?P<payee>[^/]+)").expect("valid ORDP regex"))
}

fn benm_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/BENM/(?P<name>[^/]+)").expect("valid BENM regex"))
}

fn remi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/REMI/(?P<text>[^/]+)").expect("valid REMI regex"))
}

pub struct BcgeFormatter;

impl Mt940Formatter for BcgeFormatter {
    fn payee(&self, trx: &Mt940Transaction) -> String {
        let details = strip_newlines(&trx.transaction_details);
        ordp_regex()
            .captures(&details)
            .map(|caps| caps["payee"].to_string())
            .unwrap_or_default()
    }

    fn narration(&self, trx: &Mt940Transaction) -> String {
        let details = strip_newlines(&trx.transaction_details);
        let extra = strip_newlines(&trx.extra_details);

        let mut parts = Vec::new();
        if let Some(caps) = benm_regex().captures(&details) {
            parts.push(format!("Beneficiary: {}", &caps["name"]));
        }
        if let Some(caps) = remi_regex().captures(&details) {
            parts.push(format!("Remittance: {}", &caps["text"]));
        }

        format!("{} - {}", extra, parts.join(","))
    }
}
