//! Node wire types.

use bitcoin::Txid;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wallet transaction category as reported by `listsinceblock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Send,
    Receive,
    Generate,
    Immature,
    Orphan,
}

/// One entry of `listsinceblock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedEntry {
    pub address: String,
    pub txid: Txid,
    pub amount: Decimal,
    pub confirmations: u32,
    pub category: Category,
}

/// The subset of `gettransaction` the ledger reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransaction {
    pub txid: Txid,
    /// Net effect on the node wallet; negative for payments.
    pub amount: Decimal,
    /// Network fee; zero or negative.
    pub fee: Decimal,
    pub confirmations: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_uses_rpc_spelling() {
        let c: Category = serde_json::from_str("\"receive\"").unwrap();
        assert_eq!(c, Category::Receive);
        assert_eq!(serde_json::to_string(&Category::Send).unwrap(), "\"send\"");
    }
}
