//! Splitting a network fee across the withdrawals that caused it.

use rust_decimal::Decimal;

use custody_types::amount::truncate;

/// Split `total` into `n` satoshi-precise shares that sum to `total`
/// exactly. Each share is `total / n` truncated; the first share absorbs
/// the remainder.
///
/// Returns an empty vector when `n == 0`.
#[must_use]
pub fn split_fee(total: Decimal, n: usize) -> Vec<Decimal> {
    if n == 0 {
        return Vec::new();
    }
    let share = truncate(total / Decimal::from(n));
    let mut shares = vec![share; n];
    shares[0] += total - share * Decimal::from(n);
    shares
}
