//! Scriptable in-memory node for tests.
//!
//! Receipts are injected with [`MockNode::receive`] and matured with
//! [`MockNode::confirm`]; `send_many` failures are queued with
//! [`MockNode::fail_next_send`]. All calls go through one mutex, so the
//! mock is safe to share across tasks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};
use rust_decimal::Decimal;

use crate::{BitcoinNode, Category, NodeError, NodeTransaction, ReceivedEntry};

/// Deterministic txid distinguished by one byte.
#[must_use]
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

fn sent_txid(n: u64) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0xff;
    Txid::from_byte_array(bytes)
}

fn block_hash_at(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

#[derive(Debug, Clone)]
struct Receipt {
    address: String,
    txid: Txid,
    amount: Decimal,
    confirmations: u32,
}

#[derive(Debug, Default)]
struct State {
    receipts: Vec<Receipt>,
    sent: Vec<(Txid, BTreeMap<String, Decimal>)>,
    fees: HashMap<Txid, Decimal>,
    send_failures: VecDeque<NodeError>,
    fail_get_transaction: bool,
    unavailable: bool,
    fee: Decimal,
    block_count: u64,
    next_address: u64,
    total_received_calls: usize,
    list_since_block_calls: usize,
    block_count_calls: usize,
}

impl State {
    fn check_available(&self) -> Result<(), NodeError> {
        if self.unavailable {
            Err(NodeError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`BitcoinNode`].
#[derive(Debug)]
pub struct MockNode {
    state: Mutex<State>,
}

impl MockNode {
    #[must_use]
    pub fn builder() -> MockNodeBuilder {
        MockNodeBuilder {
            block_count: 200,
            fee: Decimal::ZERO,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a receipt at `address`.
    pub fn receive(&self, address: &str, txid: Txid, amount: Decimal, confirmations: u32) {
        self.state().receipts.push(Receipt {
            address: address.to_string(),
            txid,
            amount,
            confirmations,
        });
    }

    /// Set the confirmation count of every receipt in `txid`.
    pub fn confirm(&self, txid: Txid, confirmations: u32) {
        for r in self.state().receipts.iter_mut().filter(|r| r.txid == txid) {
            r.confirmations = confirmations;
        }
    }

    /// Network fee reported for subsequent sends (zero or negative).
    pub fn set_fee(&self, fee: Decimal) {
        self.state().fee = fee;
    }

    pub fn set_block_count(&self, height: u64) {
        self.state().block_count = height;
    }

    /// Make the next `send_many` fail with `err`.
    pub fn fail_next_send(&self, err: NodeError) {
        self.state().send_failures.push_back(err);
    }

    pub fn fail_get_transaction(&self, fail: bool) {
        self.state().fail_get_transaction = fail;
    }

    /// Simulate the node going down (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    /// Every successful `send_many`, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(Txid, BTreeMap<String, Decimal>)> {
        self.state().sent.clone()
    }

    #[must_use]
    pub fn total_received_calls(&self) -> usize {
        self.state().total_received_calls
    }

    #[must_use]
    pub fn list_since_block_calls(&self) -> usize {
        self.state().list_since_block_calls
    }

    /// Attempted `block_count` calls, including ones that failed.
    #[must_use]
    pub fn block_count_calls(&self) -> usize {
        self.state().block_count_calls
    }
}

pub struct MockNodeBuilder {
    block_count: u64,
    fee: Decimal,
}

impl MockNodeBuilder {
    #[must_use]
    pub fn with_block_count(mut self, height: u64) -> Self {
        self.block_count = height;
        self
    }

    #[must_use]
    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    #[must_use]
    pub fn build(self) -> MockNode {
        MockNode {
            state: Mutex::new(State {
                block_count: self.block_count,
                fee: self.fee,
                ..State::default()
            }),
        }
    }
}

#[async_trait]
impl BitcoinNode for MockNode {
    async fn total_received(
        &self,
        address: &str,
        min_confirmations: u32,
    ) -> Result<Decimal, NodeError> {
        let mut s = self.state();
        s.check_available()?;
        s.total_received_calls += 1;
        Ok(s.receipts
            .iter()
            .filter(|r| r.address == address && r.confirmations >= min_confirmations)
            .map(|r| r.amount)
            .sum())
    }

    async fn new_address(&self, label: &str) -> Result<String, NodeError> {
        let mut s = self.state();
        s.check_available()?;
        s.next_address += 1;
        Ok(format!("mock-{label}-{}", s.next_address))
    }

    async fn send_many(&self, payments: &BTreeMap<String, Decimal>) -> Result<Txid, NodeError> {
        let mut s = self.state();
        s.check_available()?;
        if let Some(err) = s.send_failures.pop_front() {
            return Err(err);
        }
        let txid = sent_txid(s.sent.len() as u64 + 1);
        let fee = s.fee;
        s.fees.insert(txid, fee);
        s.sent.push((txid, payments.clone()));
        Ok(txid)
    }

    async fn get_transaction(&self, txid: &Txid) -> Result<NodeTransaction, NodeError> {
        let s = self.state();
        s.check_available()?;
        if s.fail_get_transaction {
            return Err(NodeError::Transport("gettransaction timed out".into()));
        }
        let (_, payments) = s
            .sent
            .iter()
            .find(|(t, _)| t == txid)
            .ok_or_else(|| NodeError::Rpc {
                code: -5,
                message: "Invalid or non-wallet transaction id".into(),
            })?;
        let fee = s.fees.get(txid).copied().unwrap_or_default();
        Ok(NodeTransaction {
            txid: *txid,
            amount: -payments.values().copied().sum::<Decimal>(),
            fee,
            confirmations: 0,
        })
    }

    async fn list_since_block(&self, _since: &BlockHash) -> Result<Vec<ReceivedEntry>, NodeError> {
        let mut s = self.state();
        s.check_available()?;
        s.list_since_block_calls += 1;
        Ok(s.receipts
            .iter()
            .map(|r| ReceivedEntry {
                address: r.address.clone(),
                txid: r.txid,
                amount: r.amount,
                confirmations: r.confirmations,
                category: Category::Receive,
            })
            .collect())
    }

    async fn block_count(&self) -> Result<u64, NodeError> {
        let mut s = self.state();
        s.block_count_calls += 1;
        s.check_available()?;
        Ok(s.block_count)
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, NodeError> {
        let s = self.state();
        s.check_available()?;
        if height > s.block_count {
            return Err(NodeError::Rpc {
                code: -8,
                message: "Block height out of range".into(),
            });
        }
        Ok(block_hash_at(height))
    }
}
