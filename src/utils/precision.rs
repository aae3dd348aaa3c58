// src/utils/precision.rs
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Rounds for presentation only. Balances themselves are never rounded.
/// Example: value=15650.123456, digits=2 -> "15650.12"
pub fn format_amount(value: Decimal, digits: u32) -> String {
    let rounded = value.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.*}", digits as usize, rounded)
}

/// Number of decimals a currency is usually shown with.
pub fn display_digits(currency: &str) -> u32 {
    match currency {
        "USD" | "EUR" | "GBP" | "CHF" => 4,
        _ => 2,
    }
}

/// Parses what the user typed into the amount field. Empty or garbage -> None.
pub fn parse_amount(input: &str) -> Option<Decimal> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_fixed_digits() {
        assert_eq!(format_amount(Decimal::new(15650123456, 6), 2), "15650.12");
        assert_eq!(format_amount(Decimal::new(1565, 1), 4), "156.5000");
        assert_eq!(format_amount(Decimal::new(5, 3), 2), "0.01");
    }

    #[test]
    fn parses_user_amounts() {
        assert_eq!(parse_amount(" 10.5 "), Some(Decimal::new(105, 1)));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("ten"), None);
    }
}
