//! Queued withdrawals to external addresses.

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BatchId, OutgoingId};

/// Lifecycle of an outgoing transaction.
///
/// ```text
/// PENDING -> CLAIMED -> SETTLED
///               |
///               +-> PENDING (insufficient node funds)
///               +-> FAILED  (any other send failure, manual intervention)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingStatus {
    Pending,
    Claimed,
    Settled,
    Failed,
}

impl fmt::Display for OutgoingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Claimed => write!(f, "CLAIMED"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A withdrawal waiting for, or included in, an on-chain payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingTransaction {
    pub id: OutgoingId,
    pub to_address: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub locked: bool,
    pub batch: Option<BatchId>,
    pub txid: Option<Txid>,
    pub failure: Option<String>,
}

impl OutgoingTransaction {
    #[must_use]
    pub fn new(
        to_address: impl Into<String>,
        amount: Decimal,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutgoingId::new(),
            to_address: to_address.into(),
            amount,
            created_at: now,
            expires_at,
            executed_at: None,
            locked: false,
            batch: None,
            txid: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> OutgoingStatus {
        if self.locked {
            OutgoingStatus::Failed
        } else if self.txid.is_some() {
            OutgoingStatus::Settled
        } else if self.executed_at.is_some() {
            OutgoingStatus::Claimed
        } else {
            OutgoingStatus::Pending
        }
    }

    /// Waiting to be claimed by a batch.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == OutgoingStatus::Pending
    }

    /// Pending and past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> OutgoingTransaction {
        OutgoingTransaction::new(
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            Decimal::new(6, 1),
            now,
            now + Duration::seconds(5),
        )
    }

    #[test]
    fn status_transitions() {
        let now = Utc::now();
        let mut out = sample(now);
        assert_eq!(out.status(), OutgoingStatus::Pending);

        out.executed_at = Some(now);
        out.batch = Some(BatchId::new());
        assert_eq!(out.status(), OutgoingStatus::Claimed);

        out.txid = Some(Txid::from_byte_array([3u8; 32]));
        assert_eq!(out.status(), OutgoingStatus::Settled);

        out.locked = true;
        assert_eq!(out.status(), OutgoingStatus::Failed);
    }

    #[test]
    fn expiry_only_applies_while_pending() {
        let now = Utc::now();
        let mut out = sample(now);
        assert!(!out.is_expired(now));
        assert!(out.is_expired(now + Duration::seconds(5)));

        out.executed_at = Some(now);
        assert!(!out.is_expired(now + Duration::seconds(60)));
    }
}
