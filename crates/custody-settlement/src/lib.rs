//! # custody-settlement
//!
//! **Settlement plane**: turns queued withdrawals into on-chain payments
//! and keeps the books honest afterwards.
//!
//! ## Modules
//!
//! - [`batch`]: seals pending withdrawals into a hashed, destination-unique batch
//! - [`fee_split`]: exact satoshi split of a network fee
//! - [`batcher`]: claim, send, settle, book the fee
//! - [`trigger`]: wakes the batcher when a withdrawal is queued
//! - [`integrity`]: supply conservation and per-row consistency audit
//!
//! ## Settlement flow
//!
//! ```text
//! Ledger::withdraw ──> BatchTrigger ──> OutgoingBatcher::run
//!                                           │
//!                         is_due ─> seal ─> claim ─> sendmany
//!                                                       │
//!                              settle ─> fee rows ─> cached balances
//! ```

pub mod batch;
pub mod batcher;
pub mod fee_split;
pub mod integrity;
pub mod trigger;

pub use batch::{SealedBatch, seal, verify_batch_hash};
pub use batcher::{BatchOutcome, OutgoingBatcher};
pub use fee_split::split_fee;
pub use integrity::{IntegrityAuditor, IntegrityReport, SupplyTotals};
pub use trigger::{BatchTrigger, TriggerReceiver, batch_trigger};
