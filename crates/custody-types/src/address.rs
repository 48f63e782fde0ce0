//! Receiving addresses and their receipt watermarks.
//!
//! An address starts in the pool (`active == false`, no wallet), is reserved
//! (`active == true`) and then assigned to exactly one wallet. The two
//! watermarks record the total ever received at the address, never deltas:
//!
//! ```text
//! 0 <= received_confirmed <= received_unconfirmed
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AddressId, WalletId};

/// A receiving address known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub address: String,
    pub wallet: Option<WalletId>,
    pub received_unconfirmed: Decimal,
    pub received_confirmed: Decimal,
    /// `false` while the address sits unreserved in the pool.
    pub active: bool,
    /// Confirmed receipts are materialized as wallet transactions.
    /// Legacy rows with `false` contribute `received_confirmed` directly.
    pub migrated: bool,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl Address {
    /// A fresh pool address as returned by the node.
    #[must_use]
    pub fn pooled(address: impl Into<String>, label: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: AddressId::new(),
            address: address.into(),
            wallet: None,
            received_unconfirmed: Decimal::ZERO,
            received_confirmed: Decimal::ZERO,
            active: false,
            migrated: true,
            label: label.into(),
            created_at: now,
        }
    }

    /// Whether nothing was ever received here.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.received_unconfirmed <= Decimal::ZERO && self.received_confirmed <= Decimal::ZERO
    }

    /// Whether the address may still be reserved out of the pool.
    #[must_use]
    pub fn is_pool_candidate(&self) -> bool {
        !self.active && self.wallet.is_none() && self.is_unused()
    }

    /// Receipts seen but not yet confirmed.
    #[must_use]
    pub fn pending(&self) -> Decimal {
        self.received_unconfirmed - self.received_confirmed
    }

    /// Whether the watermark ordering holds.
    #[must_use]
    pub fn watermarks_consistent(&self) -> bool {
        self.received_confirmed >= Decimal::ZERO
            && self.received_confirmed <= self.received_unconfirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_address_is_candidate() {
        let a = Address::pooled("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", "pool", Utc::now());
        assert!(a.is_pool_candidate());
        assert!(a.migrated);
        assert!(a.watermarks_consistent());
    }

    #[test]
    fn used_or_reserved_address_is_not_candidate() {
        let mut a = Address::pooled("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", "pool", Utc::now());
        a.received_unconfirmed = Decimal::new(1, 8);
        assert!(!a.is_pool_candidate());

        let mut b = Address::pooled("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", "pool", Utc::now());
        b.active = true;
        assert!(!b.is_pool_candidate());
    }

    #[test]
    fn inverted_watermarks_detected() {
        let mut a = Address::pooled("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", "pool", Utc::now());
        a.received_unconfirmed = Decimal::new(5, 1);
        a.received_confirmed = Decimal::ONE;
        assert!(!a.watermarks_consistent());
        assert_eq!(a.pending(), Decimal::new(-5, 1));
    }
}
