//! Wallets: logical accounts with a cached, version-fenced balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::WalletId;

/// A logical wallet.
///
/// `balance` is a denormalized cache of the confirmed balance derived from
/// ledger rows. Every write of `balance` bumps `version`, so the pair
/// `(balance, version)` acts as an optimistic-concurrency fence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub label: String,
    pub balance: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A new, empty wallet.
    #[must_use]
    pub fn new(label: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            label: label.into(),
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The fence a conditional write must match.
    #[must_use]
    pub fn fence(&self) -> WalletFence {
        WalletFence {
            balance: self.balance,
            version: self.version,
        }
    }
}

/// Snapshot of `(balance, version)` read before a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletFence {
    pub balance: Decimal,
    pub version: u64,
}

impl WalletFence {
    /// Whether the stored pair still matches this snapshot.
    #[must_use]
    pub fn matches(&self, balance: Decimal, version: u64) -> bool {
        self.balance == balance && self.version == version
    }
}

/// Aggregates computed from ledger rows for one wallet.
///
/// `received` and `sent` cover wallet transactions only; the address sums
/// cover the addresses the wallet owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTotals {
    /// Sum of rows crediting the wallet.
    pub received: Decimal,
    /// Sum of rows crediting the wallet from another wallet.
    pub received_internal: Decimal,
    /// Sum of rows debiting the wallet.
    pub sent: Decimal,
    /// Confirmed watermarks of owned addresses not yet migrated to rows.
    pub legacy_confirmed: Decimal,
    /// Unconfirmed watermarks of every owned address.
    pub address_unconfirmed: Decimal,
    /// Confirmed watermarks of every owned address.
    pub address_confirmed: Decimal,
}

impl WalletTotals {
    /// Confirmed balance derived from rows.
    #[must_use]
    pub fn confirmed_balance(&self) -> Decimal {
        self.legacy_confirmed + self.received - self.sent
    }

    /// Balance including receipts still waiting for confirmations.
    #[must_use]
    pub fn unconfirmed_balance(&self) -> Decimal {
        self.address_unconfirmed + self.received_internal - self.sent
    }

    /// Receipts seen on-chain but not yet confirmed.
    #[must_use]
    pub fn pending_receipts(&self) -> Decimal {
        self.address_unconfirmed - self.address_confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let w = Wallet::new("alice", Utc::now());
        assert_eq!(w.balance, Decimal::ZERO);
        assert_eq!(w.version, 0);
        assert!(w.fence().matches(Decimal::ZERO, 0));
    }

    #[test]
    fn fence_rejects_moved_version() {
        let w = Wallet::new("bob", Utc::now());
        let fence = w.fence();
        assert!(!fence.matches(Decimal::ZERO, 1));
        assert!(!fence.matches(Decimal::ONE, 0));
    }

    #[test]
    fn totals_derive_both_balances() {
        let totals = WalletTotals {
            received: Decimal::new(15, 1),
            received_internal: Decimal::new(5, 1),
            sent: Decimal::new(4, 1),
            legacy_confirmed: Decimal::new(2, 1),
            address_unconfirmed: Decimal::new(13, 1),
            address_confirmed: Decimal::ONE,
        };
        // 0.2 + 1.5 - 0.4
        assert_eq!(totals.confirmed_balance(), Decimal::new(13, 1));
        // 1.3 + 0.5 - 0.4
        assert_eq!(totals.unconfirmed_balance(), Decimal::new(14, 1));
        assert_eq!(totals.pending_receipts(), Decimal::new(3, 1));
    }
}
