// =============================================================================
// Integer unit amounts — lossless price/quantity representation
// =============================================================================
//
// Every price or quantity that crosses a trust or precision boundary
// (persistence, order placement, exchange filters) is carried as an integer
// number of units at a per-asset precision `p`: the decimal string "1.2345"
// with p = 8 becomes 123450000. Indicator math stays in floating point;
// integer units exist only at the boundaries.
// =============================================================================

use anyhow::{bail, Result};

/// Convert a decimal string to an integer unit amount at `precision`
/// fractional digits.
///
/// The input may omit the fractional part ("12" == "12.0"). Fractional
/// digits beyond `precision` are an error rather than a silent rescale.
pub fn num_str_to_int_units(num_str: &str, precision: usize) -> Result<i64> {
    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (num_str, ""),
    };

    if frac_part.len() > precision {
        bail!(
            "'{num_str}' has {} fractional digits but precision is {precision}",
            frac_part.len()
        );
    }

    let mut digits = String::with_capacity(int_part.len() + precision);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    for _ in frac_part.len()..precision {
        digits.push('0');
    }

    digits
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("failed to parse '{num_str}' as unit amount: {e}"))
}

/// Convert an integer unit amount back to its decimal string at `precision`
/// fractional digits. Inverse of [`num_str_to_int_units`] for inputs with at
/// most `precision` fractional digits.
pub fn int_units_to_num_str(int_val: i64, precision: usize) -> String {
    let mut digits = int_val.to_string();

    // Left-pad so there is at least one integer digit.
    if digits.len() < precision + 1 {
        let pad = precision + 1 - digits.len();
        let mut padded = "0".repeat(pad);
        padded.push_str(&digits);
        digits = padded;
    }

    let split = digits.len() - precision;
    format!("{}.{}", &digits[..split], &digits[split..])
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_fractional() {
        assert_eq!(num_str_to_int_units("0.12345678", 8).unwrap(), 12_345_678);
        assert_eq!(int_units_to_num_str(12_345_678, 8), "0.12345678");
    }

    #[test]
    fn round_trip_mixed() {
        let units = num_str_to_int_units("1.2345", 8).unwrap();
        assert_eq!(units, 123_450_000);
        assert_eq!(int_units_to_num_str(units, 8), "1.23450000");
    }

    #[test]
    fn integer_only_input() {
        assert_eq!(num_str_to_int_units("42", 4).unwrap(), 420_000);
        assert_eq!(int_units_to_num_str(420_000, 4), "42.0000");
    }

    #[test]
    fn zero_values() {
        assert_eq!(num_str_to_int_units("0.00000000", 8).unwrap(), 0);
        assert_eq!(int_units_to_num_str(0, 8), "0.00000000");
    }

    #[test]
    fn large_price_filter_values() {
        // Typical PRICE_FILTER maxPrice with 8-digit precision.
        let units = num_str_to_int_units("1000000.00000000", 8).unwrap();
        assert_eq!(units, 100_000_000_000_000);
        assert_eq!(int_units_to_num_str(units, 8), "1000000.00000000");
    }

    #[test]
    fn excess_fractional_digits_rejected() {
        assert!(num_str_to_int_units("0.123456789", 8).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(num_str_to_int_units("not-a-number", 8).is_err());
    }

    #[test]
    fn round_trip_padded_strings() {
        // Strings with zero-padded fractional parts survive the round trip.
        for s in ["0.00100000", "37000.50000000", "9.99999999"] {
            let units = num_str_to_int_units(s, 8).unwrap();
            assert_eq!(int_units_to_num_str(units, 8), s);
        }
    }
}
