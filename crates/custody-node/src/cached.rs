//! TTL cache in front of `total_received`.
//!
//! Balance pages and the reconciler hit `total_received` for the same
//! address many times per second; the node answer is kept for a short TTL
//! keyed by `(address, min_confirmations)`. Every other call passes through.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use custody_types::Clock;

use crate::{BitcoinNode, NodeError, NodeTransaction, ReceivedEntry};

type Key = (String, u32);

pub struct CachingNode {
    inner: Arc<dyn BitcoinNode>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    received: RwLock<HashMap<Key, (Decimal, DateTime<Utc>)>>,
}

impl CachingNode {
    #[must_use]
    pub fn new(inner: Arc<dyn BitcoinNode>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner,
            clock,
            ttl,
            received: RwLock::new(HashMap::new()),
        }
    }

    /// Entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.received.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.received.read().await.is_empty()
    }

    /// Drop every cached answer for `address`.
    pub async fn invalidate(&self, address: &str) {
        self.received.write().await.retain(|(a, _), _| a != address);
    }
}

impl std::fmt::Debug for CachingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingNode").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

#[async_trait]
impl BitcoinNode for CachingNode {
    async fn total_received(
        &self,
        address: &str,
        min_confirmations: u32,
    ) -> Result<Decimal, NodeError> {
        let key = (address.to_string(), min_confirmations);
        let now = self.clock.now();
        if let Some((value, expires_at)) = self.received.read().await.get(&key) {
            if *expires_at > now {
                return Ok(*value);
            }
        }

        let value = self.inner.total_received(address, min_confirmations).await?;
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(now);
        let mut received = self.received.write().await;
        received.retain(|_, (_, at)| *at > now);
        received.insert(key, (value, expires_at));
        Ok(value)
    }

    async fn new_address(&self, label: &str) -> Result<String, NodeError> {
        self.inner.new_address(label).await
    }

    async fn send_many(&self, payments: &BTreeMap<String, Decimal>) -> Result<Txid, NodeError> {
        self.inner.send_many(payments).await
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<NodeTransaction, NodeError> {
        self.inner.get_transaction(txid).await
    }

    async fn list_since_block(&self, since: &BlockHash) -> Result<Vec<ReceivedEntry>, NodeError> {
        self.inner.list_since_block(since).await
    }

    async fn block_count(&self) -> Result<u64, NodeError> {
        self.inner.block_count().await
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, NodeError> {
        self.inner.block_hash(height).await
    }
}
