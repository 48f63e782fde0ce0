//! Globally unique identifiers used throughout the ledger.
//!
//! Every entity ID is a UUIDv7 newtype, so IDs sort by creation time and
//! insertion order survives a round-trip through any store.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Entity IDs
// ---------------------------------------------------------------------------

uuid_id!(
    /// A logical wallet (internal account).
    WalletId,
    "wallet"
);

uuid_id!(
    /// A receiving address row, owned by the pool or by one wallet.
    AddressId,
    "addr"
);

uuid_id!(
    /// An append-only ledger row.
    WalletTxId,
    "wtx"
);

uuid_id!(
    /// An observed on-chain receipt for one (address, txid) pair.
    DepositId,
    "dep"
);

uuid_id!(
    /// A queued withdrawal to an external address.
    OutgoingId,
    "out"
);

uuid_id!(
    /// One settlement attempt: the set of outgoing rows claimed together.
    BatchId,
    "batch"
);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_id_uniqueness() {
        let a = WalletId::new();
        let b = WalletId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = OutgoingId::new();
        let b = OutgoingId::new();
        assert!(a < b);
    }

    #[test]
    fn display_carries_prefix() {
        let id = BatchId::from_bytes([0u8; 16]);
        assert_eq!(
            id.to_string(),
            "batch:00000000-0000-0000-0000-000000000000"
        );
        assert!(WalletId::new().to_string().starts_with("wallet:"));
    }

    #[test]
    fn serde_roundtrip() {
        let id = DepositId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: DepositId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
