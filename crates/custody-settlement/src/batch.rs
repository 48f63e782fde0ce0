//! Batch sealer: turns pending withdrawals into one `SealedBatch`.
//!
//! A batch pays each destination at most once. Rows are taken in queue
//! order (`expires_at`, then `created_at`); a later row for a destination
//! already in the batch is left out and stays pending for a later batch.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use custody_types::{BatchId, OutgoingId, OutgoingTransaction};

/// An immutable selection of withdrawals paid by one `sendmany`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBatch {
    pub id: BatchId,
    pub outgoing: Vec<OutgoingTransaction>,
    /// Rows skipped because their destination was already in the batch.
    pub deferred: Vec<OutgoingId>,
    pub batch_hash: [u8; 32],
    pub sealed_at: DateTime<Utc>,
}

impl SealedBatch {
    #[must_use]
    pub fn ids(&self) -> Vec<OutgoingId> {
        self.outgoing.iter().map(|o| o.id).collect()
    }

    /// Destination -> amount, as handed to the node.
    #[must_use]
    pub fn payments(&self) -> BTreeMap<String, Decimal> {
        self.outgoing
            .iter()
            .map(|o| (o.to_address.clone(), o.amount))
            .collect()
    }

    #[must_use]
    pub fn total(&self) -> Decimal {
        self.outgoing.iter().map(|o| o.amount).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.batch_hash)
    }
}

/// Seal pending rows into a batch.
///
/// `pending` must already be in queue order.
#[must_use]
pub fn seal(pending: Vec<OutgoingTransaction>, now: DateTime<Utc>) -> SealedBatch {
    let mut seen = HashSet::new();
    let mut outgoing = Vec::with_capacity(pending.len());
    let mut deferred = Vec::new();
    for row in pending {
        if seen.insert(row.to_address.clone()) {
            outgoing.push(row);
        } else {
            deferred.push(row.id);
        }
    }

    let id = BatchId::new();
    let batch_hash = compute_batch_hash(id, &outgoing);
    SealedBatch {
        id,
        outgoing,
        deferred,
        batch_hash,
        sealed_at: now,
    }
}

/// SHA-256 over the batch id and each row's id, destination and amount.
fn compute_batch_hash(id: BatchId, outgoing: &[OutgoingTransaction]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"custody:batch:v1:");
    hasher.update(id.0.as_bytes());
    hasher.update((outgoing.len() as u64).to_le_bytes());
    for row in outgoing {
        hasher.update(row.id.0.as_bytes());
        hasher.update(row.to_address.as_bytes());
        hasher.update([0u8]);
        hasher.update(row.amount.normalize().to_string().as_bytes());
        hasher.update([0u8]);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Whether the stored hash still matches the batch contents.
#[must_use]
pub fn verify_batch_hash(batch: &SealedBatch) -> bool {
    compute_batch_hash(batch.id, &batch.outgoing) == batch.batch_hash
}
