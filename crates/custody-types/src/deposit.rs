//! Observed on-chain receipts.
//!
//! One [`DepositTransaction`] exists per (address, txid). It moves through
//!
//! ```text
//! unseen -> unconfirmed -> confirmed (locked, linked to a wallet transaction)
//! ```
//!
//! and `locked` is the gate that makes confirmation apply exactly once.

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, AddressId, DepositId, WalletId, WalletTransaction, WalletTxId};

/// A receipt at one of our addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTransaction {
    pub id: DepositId,
    pub address: AddressId,
    /// Owner of the address when the receipt was discovered.
    pub wallet: Option<WalletId>,
    pub amount: Decimal,
    pub txid: Txid,
    pub confirmations: u32,
    pub wallet_transaction: Option<WalletTxId>,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl DepositTransaction {
    #[must_use]
    pub fn new(
        address: AddressId,
        wallet: Option<WalletId>,
        amount: Decimal,
        txid: Txid,
        confirmations: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DepositId::new(),
            address,
            wallet,
            amount,
            txid,
            confirmations,
            wallet_transaction: None,
            locked: false,
            created_at: now,
        }
    }

    /// Whether confirmation has already been applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.locked || self.wallet_transaction.is_some()
    }
}

/// Conditional write that confirms one deposit.
///
/// Applied atomically by the store: it succeeds only while the deposit is
/// still unlocked and the address's confirmed watermark still equals
/// `previous_confirmed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmDeposit {
    pub deposit: DepositId,
    pub address: AddressId,
    pub previous_confirmed: Decimal,
    pub new_confirmed: Decimal,
    /// Crediting row, present for an owned and migrated address.
    pub credit: Option<WalletTransaction>,
}

/// What a successful [`ConfirmDeposit`] committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDeposit {
    pub deposit: DepositTransaction,
    pub address: Address,
    pub credit: Option<WalletTransaction>,
}
