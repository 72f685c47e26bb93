use alloy::primitives::U256;
use alloy::primitives::utils::{format_units, parse_units};
use tracing::warn;

pub const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount `{0}` is not a plain decimal number")]
    NotDecimal(String),
    #[error("amount `{value}` has more than {decimals} decimal places")]
    TooPrecise { value: String, decimals: u8 },
    #[error("amount `{0}` cannot be represented on chain")]
    Unrepresentable(String),
}

/// Converts a human decimal string into the asset's smallest unit.
///
/// Only unsigned plain decimals are accepted (`"1"`, `"1.5"`, `".25"`); any
/// digit past the asset's scale is rejected instead of being truncated.
pub fn parse_amount(value: &str, decimals: u8) -> Result<U256, AmountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let (integer, fraction) = match trimmed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (trimmed, ""),
    };
    let digits_only = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if (integer.is_empty() && fraction.is_empty()) || !digits_only(integer) || !digits_only(fraction)
    {
        return Err(AmountError::NotDecimal(trimmed.to_string()));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(AmountError::TooPrecise {
            value: trimmed.to_string(),
            decimals,
        });
    }

    let integer = if integer.is_empty() { "0" } else { integer };
    let canonical = if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{integer}.{fraction}")
    };

    let parsed = parse_units(&canonical, decimals)
        .map_err(|_| AmountError::Unrepresentable(trimmed.to_string()))?;
    Ok(parsed.get_absolute())
}

/// Renders a smallest-unit integer as a trimmed decimal (`1.5`, `0`, `42`).
pub fn format_amount(amount: U256, decimals: u8) -> String {
    let formatted = match format_units(amount, decimals) {
        Ok(formatted) => formatted,
        Err(err) => {
            warn!(%amount, decimals, "Failed to format amount: {err}");
            return amount.to_string();
        }
    };
    trim_fraction(&formatted)
}

/// Fixed four-place rendering used by the gift listing.
pub fn format_amount_short(amount: &str) -> String {
    let (integer, fraction) = match amount.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (amount, ""),
    };
    let mut padded: String = fraction.chars().take(4).collect();
    while padded.len() < 4 {
        padded.push('0');
    }
    format!("{integer}.{padded}")
}

fn trim_fraction(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    let trimmed = value.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(value: u128) -> U256 {
        U256::from(value)
    }

    #[test]
    fn parses_native_amounts() {
        assert_eq!(
            parse_amount("1.5", NATIVE_DECIMALS).unwrap(),
            wei(1_500_000_000_000_000_000)
        );
        assert_eq!(
            parse_amount(".25", NATIVE_DECIMALS).unwrap(),
            wei(250_000_000_000_000_000)
        );
        assert_eq!(parse_amount(" 2 ", NATIVE_DECIMALS).unwrap(), wei(2_000_000_000_000_000_000));
    }

    #[test]
    fn rejects_non_decimal_input() {
        for input in ["abc", "-1", "1e3", "1.2.3", ".", "0x10", "+1"] {
            assert!(
                matches!(parse_amount(input, NATIVE_DECIMALS), Err(AmountError::NotDecimal(_))),
                "{input} should be rejected"
            );
        }
        assert_eq!(parse_amount("   ", NATIVE_DECIMALS), Err(AmountError::Empty));
    }

    #[test]
    fn rejects_precision_beyond_scale() {
        let result = parse_amount("1.0000001", 6);
        assert!(matches!(result, Err(AmountError::TooPrecise { decimals: 6, .. })));
        assert_eq!(parse_amount("1.000001", 6).unwrap(), wei(1_000_001));
    }

    #[test]
    fn formats_trimmed_decimals() {
        assert_eq!(format_amount(wei(1_500_000_000_000_000_000), NATIVE_DECIMALS), "1.5");
        assert_eq!(format_amount(U256::ZERO, NATIVE_DECIMALS), "0");
        assert_eq!(format_amount(wei(1), NATIVE_DECIMALS), "0.000000000000000001");
        assert_eq!(format_amount(wei(42_000_000), 6), "42");
    }

    #[test]
    fn short_format_pads_and_truncates() {
        assert_eq!(format_amount_short("1.5"), "1.5000");
        assert_eq!(format_amount_short("0.123456"), "0.1234");
        assert_eq!(format_amount_short("7"), "7.0000");
    }
}
