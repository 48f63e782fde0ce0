//! Fixed-point bitcoin amounts.
//!
//! All ledger arithmetic runs on [`Decimal`] at satoshi granularity
//! (8 decimal places). Inputs are quantized on entry; fee shares are
//! truncated so that the remainder can be accounted for explicitly.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::BTC_PRECISION;

/// Round to satoshi precision (banker's rounding).
#[must_use]
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(BTC_PRECISION, RoundingStrategy::MidpointNearestEven)
}

/// Truncate toward zero at satoshi precision.
#[must_use]
pub fn truncate(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(BTC_PRECISION, RoundingStrategy::ToZero)
}

/// One satoshi, the smallest representable amount.
#[must_use]
pub fn satoshi() -> Decimal {
    Decimal::new(1, BTC_PRECISION)
}

/// Whether the amount is positive after quantization.
#[must_use]
pub fn is_spendable(amount: Decimal) -> bool {
    quantize(amount) > Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_half_even() {
        // 0.000000015 -> 0.00000002 (1 is odd, rounds up to even)
        assert_eq!(quantize(Decimal::new(15, 9)), Decimal::new(2, 8));
        // 0.000000025 -> 0.00000002
        assert_eq!(quantize(Decimal::new(25, 9)), Decimal::new(2, 8));
    }

    #[test]
    fn truncate_drops_sub_satoshi() {
        assert_eq!(truncate(Decimal::new(33_333_333_333, 11)), Decimal::new(33_333_333, 8));
        assert_eq!(truncate(Decimal::new(-19, 9)), Decimal::new(-1, 8));
    }

    #[test]
    fn dust_is_not_spendable() {
        assert!(!is_spendable(Decimal::new(4, 9)));
        assert!(is_spendable(satoshi()));
        assert!(!is_spendable(Decimal::ZERO));
    }
}
