use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::models::Price;

static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)").expect("valid price pattern")
});

/// Extracts the first price-looking number from element text, e.g.
/// `"$1,249.00 each"` or `"Now 12.5"`.
pub fn parse_price(text: &str) -> Option<Price> {
    let captures = PRICE_PATTERN.captures(text)?;
    let raw = captures.get(1)?.as_str().replace(',', "");
    Decimal::from_str(&raw).ok().map(Price::new)
}

/// Combines separately rendered dollar and cent elements.
///
/// Non-digits are stripped from each part. A dollar element with no digits
/// reads as zero, which callers treat as a degenerate price.
pub fn price_from_parts(dollars: &str, cents: Option<&str>) -> Option<Price> {
    let dollars = digits(dollars);
    let whole: i64 = if dollars.is_empty() { 0 } else { dollars.parse().ok()? };

    let fraction: i64 = match cents.map(digits) {
        Some(cents) if !cents.is_empty() => {
            let value: i64 = cents.parse().ok()?;
            if value >= 100 {
                return None;
            }
            value
        }
        _ => 0,
    };

    whole.checked_mul(100)?.checked_add(fraction).map(Price::from_cents)
}

fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}
