use custody_types::LedgerError;
use thiserror::Error;

/// RPC codes bitcoind uses for "Insufficient funds".
const INSUFFICIENT_FUNDS_CODES: [i32; 2] = [-4, -6];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The node could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with something we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl NodeError {
    /// The node wallet cannot cover a payment right now. Retrying later,
    /// once funds arrive, is safe.
    #[must_use]
    pub fn is_insufficient_funds(&self) -> bool {
        match self {
            Self::Rpc { code, message } => {
                INSUFFICIENT_FUNDS_CODES.contains(code) && message.contains("Insufficient funds")
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn insufficient_funds() -> Self {
        Self::Rpc {
            code: -6,
            message: "Insufficient funds".into(),
        }
    }
}

impl From<NodeError> for LedgerError {
    fn from(err: NodeError) -> Self {
        Self::ExternalUnavailable(err.to_string())
    }
}
