//! Error types for the custodial ledger.
//!
//! All errors use the `CL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Request errors (rejected before any state change)
//! - 2xx: Lookup errors
//! - 3xx: Balance / concurrency errors
//! - 4xx: Outgoing errors
//! - 5xx: Integrity errors (fatal)
//! - 6xx: External collaborator errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AddressId, OutgoingId, WalletId};

/// Central error enum for all ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // =================================================================
    // Request Errors (1xx)
    // =================================================================
    /// Amount is zero, negative, or vanishes at satoshi precision.
    #[error("CL_ERR_100: Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// The destination is not a valid address for the configured network.
    #[error("CL_ERR_101: Invalid address: {address}")]
    InvalidAddress { address: String },

    /// Source and destination wallet are the same.
    #[error("CL_ERR_102: Source and destination wallet are the same: {0}")]
    SelfTransfer(WalletId),

    // =================================================================
    // Lookup Errors (2xx)
    // =================================================================
    #[error("CL_ERR_200: Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("CL_ERR_201: Address not found: {0}")]
    AddressNotFound(AddressId),

    #[error("CL_ERR_202: Outgoing transaction not found: {0}")]
    OutgoingNotFound(OutgoingId),

    // =================================================================
    // Balance / Concurrency Errors (3xx)
    // =================================================================
    /// Not enough spendable balance to perform the operation.
    #[error("CL_ERR_300: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// The wallet's `(balance, version)` fence moved between read and write.
    /// The caller should retry with fresh state.
    #[error("CL_ERR_301: Concurrent modification of {0}")]
    ConcurrencyConflict(String),

    // =================================================================
    // Outgoing Errors (4xx)
    // =================================================================
    /// Withdrawals are switched off for this deployment.
    #[error("CL_ERR_400: Outgoing transactions are disabled")]
    OutgoingDisabled,

    // =================================================================
    // Integrity Errors (5xx)
    // =================================================================
    /// More than one address row claims the same address string.
    #[error("CL_ERR_500: Duplicate address rows for {address}")]
    DuplicateAddress { address: String },

    /// An accounting invariant does not hold.
    #[error("CL_ERR_501: Integrity violation: {reason}")]
    IntegrityViolation { reason: String },

    // =================================================================
    // External Errors (6xx)
    // =================================================================
    /// The bitcoin node or the cache could not be reached or returned an error.
    #[error("CL_ERR_600: External service unavailable: {0}")]
    ExternalUnavailable(String),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("CL_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("CL_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// The persistence layer rejected an operation.
    #[error("CL_ERR_903: Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether retrying the same request against fresh state may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict(_) | Self::ExternalUnavailable(_)
        )
    }

    /// Whether the error signals corrupted state that needs an operator.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateAddress { .. } | Self::IntegrityViolation { .. }
        )
    }

    /// Short helper for integrity violations.
    pub fn integrity(reason: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            reason: reason.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = LedgerError::WalletNotFound(WalletId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("CL_ERR_200"), "Got: {msg}");
    }

    #[test]
    fn insufficient_funds_display() {
        let err = LedgerError::InsufficientFunds {
            needed: Decimal::new(15, 1),
            available: Decimal::new(1, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("CL_ERR_300"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn retryable_and_fatal_are_disjoint() {
        let conflict = LedgerError::ConcurrencyConflict("wallet".into());
        assert!(conflict.is_retryable());
        assert!(!conflict.is_fatal());

        let dup = LedgerError::DuplicateAddress {
            address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into(),
        };
        assert!(dup.is_fatal());
        assert!(!dup.is_retryable());

        assert!(!LedgerError::OutgoingDisabled.is_retryable());
        assert!(LedgerError::integrity("drift").is_fatal());
    }

    #[test]
    fn all_errors_have_cl_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(LedgerError::InvalidAmount(Decimal::ZERO)),
            Box::new(LedgerError::OutgoingDisabled),
            Box::new(LedgerError::ExternalUnavailable("node down".into())),
            Box::new(LedgerError::Storage("poisoned".into())),
            Box::new(LedgerError::integrity("supply")),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("CL_ERR_"),
                "Error missing CL_ERR_ prefix: {msg}"
            );
        }
    }

    #[test]
    fn json_error_converts_to_serialization() {
        let err: LedgerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }
}
