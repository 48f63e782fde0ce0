//! # custody-types
//!
//! Shared types, errors, and configuration for the **custodial bitcoin ledger**.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`WalletId`], [`AddressId`], [`WalletTxId`], [`DepositId`], [`OutgoingId`], [`BatchId`]
//! - **Wallet model**: [`Wallet`], [`WalletFence`], [`WalletTotals`]
//! - **Address model**: [`Address`]
//! - **Ledger rows**: [`WalletTransaction`], [`TransactionKind`]
//! - **Deposits**: [`DepositTransaction`], [`ConfirmDeposit`], [`ConfirmedDeposit`]
//! - **Withdrawals**: [`OutgoingTransaction`], [`OutgoingStatus`]
//! - **Hooks**: [`BalanceObserver`], [`OutgoingListener`], [`Observers`]
//! - **Time**: [`Clock`], [`SystemClock`], [`ManualClock`]
//! - **Configuration**: [`LedgerConfig`]
//! - **Errors**: [`LedgerError`] with `CL_ERR_` prefix codes
//! - **Amounts**: satoshi quantization helpers in [`amount`]
//! - **Constants**: system-wide defaults, lock names and cache keys

pub mod address;
pub mod amount;
pub mod clock;
pub mod config;
pub mod constants;
pub mod deposit;
pub mod error;
pub mod events;
pub mod ids;
pub mod outgoing;
pub mod transaction;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use custody_types::{Wallet, WalletTransaction, LedgerError, ...};

pub use address::*;
pub use clock::*;
pub use config::*;
pub use deposit::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use outgoing::*;
pub use transaction::*;
pub use wallet::*;

// Constants and amount helpers are accessed via their modules
// (`custody_types::constants::FOO`, `custody_types::amount::quantize`).
