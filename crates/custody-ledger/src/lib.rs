//! # custody-ledger
//!
//! Internal balances for a custodial bitcoin service.
//!
//! ## Components
//!
//! - [`Ledger`]: wallets, fenced balance writes, transfers, withdrawal
//!   queueing, merges and cached-balance repair
//! - [`AddressPool`]: reserve-then-assign handout of node addresses
//! - [`DepositReconciler`]: polls the node and applies each receipt once
//! - [`OutgoingSwitch`]: global on/off for new withdrawals
//! - [`RepairQueue`]: deferred cached-balance recomputation
//!
//! Settlement of queued withdrawals lives in `custody-settlement`.

pub mod address_pool;
pub mod ledger;
pub mod outgoing_switch;
pub mod reconciler;
pub mod repair;
pub mod telemetry;
pub mod validate;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support;

pub use address_pool::AddressPool;
pub use ledger::Ledger;
pub use outgoing_switch::OutgoingSwitch;
pub use reconciler::{ConfirmOutcome, DepositReconciler, PollReport, UnconfirmedOutcome};
pub use repair::{RepairQueue, RepairReceiver, repair_channel};
pub use validate::validate_address;
