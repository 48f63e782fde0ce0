//! Ledger configuration.

use bitcoin::Network;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Result, constants};

/// Runtime configuration shared by every ledger component.
///
/// Missing fields fall back to [`LedgerConfig::default`] when loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Network the node runs on; withdrawal addresses must belong to it.
    pub network: Network,
    /// Confirmations at which a receipt becomes spendable.
    pub min_confirmations: u32,
    /// Unreserved addresses kept in the pool.
    pub address_pool_size: usize,
    /// Label passed to the node for new pool addresses.
    pub address_label: String,
    /// Seconds between a withdrawal request and its earliest settlement.
    pub outgoing_default_delay_secs: u64,
    /// Label of the wallet that pays network fees.
    pub fee_wallet_label: String,
    /// Allow spending receipts that are not yet confirmed.
    pub unconfirmed_transfers: bool,
    /// Accept withdrawal requests at startup.
    pub outgoing_enabled: bool,
    /// Maximum withdrawals per on-chain payment.
    pub batch_max_size: usize,
    /// Pending count above which a batch runs before any expiry.
    pub batch_backlog_threshold: usize,
    /// TTL of cached `total_received` answers.
    pub received_cache_ttl_secs: u64,
    /// TTL of background job locks.
    pub job_lock_ttl_secs: u64,
    /// Blocks scanned back from the tip on the first poll.
    pub initial_scan_depth: u64,
    /// Fence retries when repairing a cached balance.
    pub repair_attempts: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            min_confirmations: constants::DEFAULT_MIN_CONFIRMATIONS,
            address_pool_size: constants::DEFAULT_ADDRESS_POOL_SIZE,
            address_label: constants::DEFAULT_ADDRESS_LABEL.to_string(),
            outgoing_default_delay_secs: constants::DEFAULT_OUTGOING_DELAY_SECS,
            fee_wallet_label: constants::DEFAULT_FEE_WALLET_LABEL.to_string(),
            unconfirmed_transfers: false,
            outgoing_enabled: true,
            batch_max_size: constants::DEFAULT_BATCH_MAX_SIZE,
            batch_backlog_threshold: constants::DEFAULT_BATCH_BACKLOG_THRESHOLD,
            received_cache_ttl_secs: constants::DEFAULT_RECEIVED_CACHE_TTL_SECS,
            job_lock_ttl_secs: constants::DEFAULT_JOB_LOCK_TTL_SECS,
            initial_scan_depth: constants::DEFAULT_INITIAL_SCAN_DEPTH,
            repair_attempts: constants::DEFAULT_REPAIR_ATTEMPTS,
        }
    }
}

impl LedgerConfig {
    /// Regtest defaults, used by local setups and tests.
    #[must_use]
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            ..Self::default()
        }
    }

    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn outgoing_default_delay(&self) -> Duration {
        Duration::seconds(self.outgoing_default_delay_secs as i64)
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn received_cache_ttl(&self) -> Duration {
        Duration::seconds(self.received_cache_ttl_secs as i64)
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn job_lock_ttl(&self) -> Duration {
        Duration::seconds(self.job_lock_ttl_secs as i64)
    }

    /// Reject values no deployment can run with.
    pub fn validate(&self) -> Result<()> {
        if self.min_confirmations == 0 {
            return Err(LedgerError::Configuration(
                "min_confirmations must be at least 1".into(),
            ));
        }
        if self.address_pool_size == 0 {
            return Err(LedgerError::Configuration(
                "address_pool_size must be at least 1".into(),
            ));
        }
        if self.batch_max_size == 0 {
            return Err(LedgerError::Configuration(
                "batch_max_size must be at least 1".into(),
            ));
        }
        if self.fee_wallet_label.trim().is_empty() {
            return Err(LedgerError::Configuration(
                "fee_wallet_label must not be empty".into(),
            ));
        }
        if self.job_lock_ttl_secs == 0 {
            return Err(LedgerError::Configuration(
                "job_lock_ttl_secs must be positive".into(),
            ));
        }
        if self.repair_attempts == 0 {
            return Err(LedgerError::Configuration(
                "repair_attempts must be at least 1".into(),
            ));
        }
        // Timestamps are i64 seconds internally.
        let max = u64::try_from(i64::MAX / 1000).unwrap_or(u64::MAX);
        for (name, value) in [
            ("outgoing_default_delay_secs", self.outgoing_default_delay_secs),
            ("received_cache_ttl_secs", self.received_cache_ttl_secs),
            ("job_lock_ttl_secs", self.job_lock_ttl_secs),
        ] {
            if value > max {
                return Err(LedgerError::Configuration(format!("{name} out of range")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LedgerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.min_confirmations, 3);
        assert_eq!(cfg.batch_max_size, 15);
        assert_eq!(cfg.batch_backlog_threshold, 6);
        assert_eq!(cfg.outgoing_default_delay(), Duration::seconds(5));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg = LedgerConfig::from_json(r#"{"network":"regtest","min_confirmations":6}"#).unwrap();
        assert_eq!(cfg.network, Network::Regtest);
        assert_eq!(cfg.min_confirmations, 6);
        assert_eq!(cfg.address_pool_size, constants::DEFAULT_ADDRESS_POOL_SIZE);
    }

    #[test]
    fn zero_confirmations_rejected() {
        let err = LedgerConfig::from_json(r#"{"min_confirmations":0}"#).unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }

    #[test]
    fn empty_fee_label_rejected() {
        let cfg = LedgerConfig {
            fee_wallet_label: "  ".into(),
            ..LedgerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = LedgerConfig::regtest();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LedgerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
