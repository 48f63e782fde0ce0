//! # custody-node
//!
//! The bitcoin node as seen by the ledger.
//!
//! Defines the [`BitcoinNode`] trait, a TTL-caching decorator
//! ([`CachingNode`]) for the hot `total_received` call, and a scriptable
//! in-memory node (`MockNode`, behind the `test-helpers` feature).

pub mod cached;
pub mod error;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod types;

pub use cached::CachingNode;
pub use error::NodeError;
pub use types::{Category, NodeTransaction, ReceivedEntry};

use std::collections::BTreeMap;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use rust_decimal::Decimal;

/// Node RPC methods the ledger needs.
///
/// Implementations handle authentication, connection management and
/// response decoding internally.
#[async_trait]
pub trait BitcoinNode: Send + Sync {
    /// Total ever received at `address` with at least `min_confirmations`.
    async fn total_received(&self, address: &str, min_confirmations: u32)
    -> Result<Decimal, NodeError>;

    /// A new receiving address from the node wallet.
    async fn new_address(&self, label: &str) -> Result<String, NodeError>;

    /// Pay several addresses in one transaction.
    async fn send_many(&self, payments: &BTreeMap<String, Decimal>) -> Result<Txid, NodeError>;

    async fn get_transaction(&self, txid: &Txid) -> Result<NodeTransaction, NodeError>;

    /// Wallet transactions in blocks after `since`, plus the mempool.
    async fn list_since_block(&self, since: &BlockHash) -> Result<Vec<ReceivedEntry>, NodeError>;

    async fn block_count(&self) -> Result<u64, NodeError>;

    async fn block_hash(&self, height: u64) -> Result<BlockHash, NodeError>;
}
