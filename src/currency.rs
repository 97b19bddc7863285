//! Display formatting for riel and dollar amounts.
//!
//! Riel is shown in whole units with `,` thousands grouping; dollars use a
//! fixed two-decimal form. Neither function ever fails: non-finite input
//! degrades to an empty riel string or `0.00`.

use serde::{Deserialize, Serialize};

pub const KHR_SYMBOL: &str = "\u{17DB}";
pub const USD_SYMBOL: &str = "$";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Khr,
    Usd,
}

impl Currency {
    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Khr => KHR_SYMBOL,
            Currency::Usd => USD_SYMBOL,
        }
    }
}

/// Whole-riel amount with thousands grouping, e.g. `8000.4` -> `8,000`.
pub fn format_khr(amount: f64) -> String {
    if !amount.is_finite() {
        return String::new();
    }
    // f64::round is half-away-from-zero.
    let rounded = amount.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());
    let grouped = group_thousands(&digits);
    if negative && grouped != "0" {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Two-decimal dollar amount, e.g. `1.5` -> `1.50`.
pub fn format_usd(amount: f64) -> String {
    if !amount.is_finite() {
        return "0.00".to_string();
    }
    let formatted = format!("{amount:.2}");
    if formatted == "-0.00" {
        "0.00".to_string()
    } else {
        formatted
    }
}

pub fn format_amount(amount: f64, currency: Currency) -> String {
    match currency {
        Currency::Khr => format_khr(amount),
        Currency::Usd => format_usd(amount),
    }
}

/// Symbol-prefixed form used on receipts and menu tiles (`៛8,000`, `$1.00`).
pub fn format_with_symbol(amount: f64, currency: Currency) -> String {
    format!("{}{}", currency.symbol(), format_amount(amount, currency))
}

/// Integer riel totals. Grouped from the exact digits, so totals beyond
/// f64 precision print unchanged.
pub fn format_riel(amount: i64) -> String {
    let grouped = group_thousands(&amount.unsigned_abs().to_string());
    if amount < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Parse a value produced by [`format_amount`] / [`format_with_symbol`]
/// back into a number.
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches(KHR_SYMBOL)
        .trim_start_matches(USD_SYMBOL)
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
