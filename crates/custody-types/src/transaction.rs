//! Append-only ledger rows.
//!
//! Every movement of value is one [`WalletTransaction`]. Rows are never
//! updated; the only rewrite is a wallet merge, which repoints wallet
//! references and drops rows that became self-referential.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AddressId, DepositId, OutgoingId, WalletId, WalletTxId};

/// What a ledger row represents, derived from which references it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Wallet to wallet.
    Transfer,
    /// Wallet to an external address.
    Withdrawal,
    /// Confirmed on-chain receipt credited to a wallet.
    Deposit,
    /// Network fee paid by the fee wallet.
    NetworkFee,
    /// A withdrawing wallet's share of a network fee.
    FeeShare,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer => write!(f, "TRANSFER"),
            Self::Withdrawal => write!(f, "WITHDRAWAL"),
            Self::Deposit => write!(f, "DEPOSIT"),
            Self::NetworkFee => write!(f, "NETWORK_FEE"),
            Self::FeeShare => write!(f, "FEE_SHARE"),
        }
    }
}

/// One immutable movement of value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: WalletTxId,
    pub amount: Decimal,
    pub from_wallet: Option<WalletId>,
    pub to_wallet: Option<WalletId>,
    pub to_address: Option<String>,
    pub deposit: Option<DepositId>,
    pub deposit_address: Option<AddressId>,
    pub outgoing: Option<OutgoingId>,
    /// Set on fee rows only.
    pub fee: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    fn blank(amount: Decimal, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: WalletTxId::new(),
            amount,
            from_wallet: None,
            to_wallet: None,
            to_address: None,
            deposit: None,
            deposit_address: None,
            outgoing: None,
            fee: false,
            description: description.into(),
            created_at: now,
        }
    }

    /// Internal transfer between two wallets.
    #[must_use]
    pub fn transfer(
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from_wallet: Some(from),
            to_wallet: Some(to),
            ..Self::blank(amount, description, now)
        }
    }

    /// Debit of a wallet paying an external address.
    #[must_use]
    pub fn withdrawal(
        from: WalletId,
        to_address: impl Into<String>,
        outgoing: OutgoingId,
        amount: Decimal,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from_wallet: Some(from),
            to_address: Some(to_address.into()),
            outgoing: Some(outgoing),
            ..Self::blank(amount, description, now)
        }
    }

    /// Credit for a confirmed deposit.
    #[must_use]
    pub fn deposit(
        to: WalletId,
        deposit: DepositId,
        address: AddressId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            to_wallet: Some(to),
            deposit: Some(deposit),
            deposit_address: Some(address),
            ..Self::blank(amount, "deposit", now)
        }
    }

    /// The full network fee of a settlement, debited from the fee wallet.
    #[must_use]
    pub fn network_fee(
        fee_wallet: WalletId,
        txid: impl fmt::Display,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from_wallet: Some(fee_wallet),
            fee: true,
            ..Self::blank(amount, format!("network fee for {txid}"), now)
        }
    }

    /// One withdrawing wallet's share of a network fee.
    #[must_use]
    pub fn fee_share(
        from: WalletId,
        fee_wallet: WalletId,
        outgoing: OutgoingId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            from_wallet: Some(from),
            to_wallet: Some(fee_wallet),
            outgoing: Some(outgoing),
            fee: true,
            ..Self::blank(amount, "network fee share", now)
        }
    }

    #[must_use]
    pub fn kind(&self) -> TransactionKind {
        match (self.from_wallet, self.to_wallet, self.fee) {
            (Some(_), Some(_), true) => TransactionKind::FeeShare,
            (Some(_), None, true) => TransactionKind::NetworkFee,
            (Some(_), Some(_), false) => TransactionKind::Transfer,
            (None, Some(_), _) => TransactionKind::Deposit,
            _ => TransactionKind::Withdrawal,
        }
    }

    /// Whether the row moves value into `wallet`.
    #[must_use]
    pub fn credits(&self, wallet: WalletId) -> bool {
        self.to_wallet == Some(wallet)
    }

    /// Whether the row moves value out of `wallet`.
    #[must_use]
    pub fn debits(&self, wallet: WalletId) -> bool {
        self.from_wallet == Some(wallet)
    }

    /// Whether the row touches `wallet` on either side.
    #[must_use]
    pub fn involves(&self, wallet: WalletId) -> bool {
        self.credits(wallet) || self.debits(wallet)
    }
}
