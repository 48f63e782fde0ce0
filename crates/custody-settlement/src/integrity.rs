//! Ledger integrity audit.
//!
//! Supply conservation over the whole ledger:
//! ```text
//! Σ(cached wallet balances) == Σ(confirmed receipts at owned addresses)
//!                            - Σ(withdrawals) - Σ(network fees)
//! ```
//! plus per-wallet and per-address consistency checks. Any finding means
//! either a bug or manual tampering; `verify` turns the report into an
//! `IntegrityViolation` so callers can halt.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use custody_ledger::Ledger;
use custody_types::{AddressId, LedgerError, Result, TransactionKind, WalletId};

/// Cached balance disagreeing with the rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub wallet: WalletId,
    pub cached: Decimal,
    pub audited: Decimal,
}

/// Migrated address whose applied deposits do not add up to its watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositMismatch {
    pub address: AddressId,
    pub received_confirmed: Decimal,
    pub applied_deposits: Decimal,
}

/// The supply equation's terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupplyTotals {
    pub wallet_balances: Decimal,
    pub confirmed_receipts: Decimal,
    pub withdrawals: Decimal,
    pub network_fees: Decimal,
}

impl SupplyTotals {
    #[must_use]
    pub fn expected(&self) -> Decimal {
        self.confirmed_receipts - self.withdrawals - self.network_fees
    }

    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.wallet_balances == self.expected()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub drift: Vec<BalanceDrift>,
    /// Wallets whose audited balance is below zero.
    pub negative: Vec<(WalletId, Decimal)>,
    /// Addresses with `received_confirmed > received_unconfirmed`.
    pub inverted_watermarks: Vec<AddressId>,
    pub deposit_mismatches: Vec<DepositMismatch>,
    pub supply: SupplyTotals,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
            && self.negative.is_empty()
            && self.inverted_watermarks.is_empty()
            && self.deposit_mismatches.is_empty()
            && self.supply.is_conserved()
    }

    /// # Errors
    /// [`LedgerError::IntegrityViolation`] describing the first finding.
    pub fn verify(&self) -> Result<()> {
        if let Some(d) = self.drift.first() {
            return Err(LedgerError::integrity(format!(
                "wallet {} cached {} != audited {} ({} drifted)",
                d.wallet,
                d.cached,
                d.audited,
                self.drift.len()
            )));
        }
        if let Some((wallet, balance)) = self.negative.first() {
            return Err(LedgerError::integrity(format!(
                "wallet {wallet} audited balance {balance} is negative"
            )));
        }
        if let Some(address) = self.inverted_watermarks.first() {
            return Err(LedgerError::integrity(format!(
                "address {address} confirmed watermark above unconfirmed"
            )));
        }
        if let Some(m) = self.deposit_mismatches.first() {
            return Err(LedgerError::integrity(format!(
                "address {} confirmed {} != applied deposits {}",
                m.address, m.received_confirmed, m.applied_deposits
            )));
        }
        if !self.supply.is_conserved() {
            return Err(LedgerError::integrity(format!(
                "supply {} != expected {} (receipts={}, withdrawals={}, fees={})",
                self.supply.wallet_balances,
                self.supply.expected(),
                self.supply.confirmed_receipts,
                self.supply.withdrawals,
                self.supply.network_fees,
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct IntegrityAuditor {
    ledger: Arc<Ledger>,
}

impl IntegrityAuditor {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn audit(&self) -> Result<IntegrityReport> {
        let store = self.ledger.store();
        let mut report = IntegrityReport::default();

        for wallet in store.wallets()? {
            let audited = store.wallet_totals(wallet.id)?.confirmed_balance();
            if wallet.balance != audited {
                report.drift.push(BalanceDrift {
                    wallet: wallet.id,
                    cached: wallet.balance,
                    audited,
                });
            }
            if audited < Decimal::ZERO {
                report.negative.push((wallet.id, audited));
            }
            report.supply.wallet_balances += wallet.balance;
        }

        for address in store.addresses()? {
            if !address.watermarks_consistent() {
                report.inverted_watermarks.push(address.id);
            }
            if address.wallet.is_some() {
                report.supply.confirmed_receipts += address.received_confirmed;
            }
            if address.migrated {
                let applied: Decimal = store
                    .deposits_for_address(address.id)?
                    .iter()
                    .filter(|d| d.locked)
                    .map(|d| d.amount)
                    .sum();
                if applied != address.received_confirmed {
                    report.deposit_mismatches.push(DepositMismatch {
                        address: address.id,
                        received_confirmed: address.received_confirmed,
                        applied_deposits: applied,
                    });
                }
            }
        }

        let mut by_kind: HashMap<TransactionKind, Decimal> = HashMap::new();
        for tx in store.all_wallet_transactions()? {
            *by_kind.entry(tx.kind()).or_default() += tx.amount;
        }
        report.supply.withdrawals = by_kind
            .get(&TransactionKind::Withdrawal)
            .copied()
            .unwrap_or_default();
        report.supply.network_fees = by_kind
            .get(&TransactionKind::NetworkFee)
            .copied()
            .unwrap_or_default();

        if report.is_clean() {
            tracing::debug!("integrity audit clean");
        } else {
            tracing::error!(
                drift = report.drift.len(),
                negative = report.negative.len(),
                inverted = report.inverted_watermarks.len(),
                deposits = report.deposit_mismatches.len(),
                conserved = report.supply.is_conserved(),
                "integrity audit found problems"
            );
        }
        Ok(report)
    }

    /// Audit and fail on any finding.
    pub fn verify(&self) -> Result<()> {
        self.audit()?.verify()
    }

    /// Rewrite every drifted cached balance from rows. Returns the count.
    pub fn repair_drift(&self) -> Result<usize> {
        let fixed = self.ledger.repair_all_balances()?;
        if fixed > 0 {
            tracing::warn!(fixed, "drifted balances repaired");
        }
        Ok(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_ledger::repair_channel;
    use custody_ledger::test_support::fund;
    use custody_store::{LedgerStore, MemoryStore};
    use custody_types::{Address, DepositTransaction, LedgerConfig, SystemClock};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<Ledger>, IntegrityAuditor) {
        let store = Arc::new(MemoryStore::new());
        let (queue, _rx) = repair_channel();
        let ledger = Arc::new(Ledger::new(
            store.clone(),
            Arc::new(SystemClock),
            LedgerConfig::default(),
            queue,
        )
        .unwrap());
        let auditor = IntegrityAuditor::new(ledger.clone());
        (store, ledger, auditor)
    }

    #[test]
    fn empty_ledger_is_clean() {
        let (_, _, auditor) = setup();
        assert!(auditor.audit().unwrap().is_clean());
        assert!(auditor.verify().is_ok());
    }

    #[test]
    fn transfers_and_withdrawals_conserve_supply() {
        let (store, ledger, auditor) = setup();
        let a = ledger.create_wallet("a").unwrap().id;
        let b = ledger.create_wallet("b").unwrap().id;
        fund(&ledger, &store, a, d("1"));
        ledger.transfer(a, b, d("0.4"), "").unwrap();
        ledger
            .withdraw(b, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT", d("0.1"), "", None)
            .unwrap();

        let report = auditor.audit().unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.supply.wallet_balances, d("0.9"));
        assert_eq!(report.supply.withdrawals, d("0.1"));
    }

    #[test]
    fn drift_is_reported_and_repaired() {
        let (store, ledger, auditor) = setup();
        let a = ledger.create_wallet("a").unwrap().id;
        fund(&ledger, &store, a, d("1"));
        store.corrupt_cached_balance(a, d("5"));

        let report = auditor.audit().unwrap();
        assert_eq!(report.drift.len(), 1);
        assert!(!report.supply.is_conserved());
        assert!(matches!(
            report.verify(),
            Err(LedgerError::IntegrityViolation { .. })
        ));

        assert_eq!(auditor.repair_drift().unwrap(), 1);
        assert!(auditor.verify().is_ok());
    }

    #[test]
    fn watermark_inversion_and_deposit_mismatch() {
        let (store, ledger, auditor) = setup();
        let a = ledger.create_wallet("a").unwrap().id;
        let mut addr = Address::pooled("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", "pool", chrono::Utc::now());
        addr.wallet = Some(a);
        addr.active = true;
        store.insert_address(addr.clone()).unwrap();
        store.set_watermarks(addr.id, Decimal::ZERO, d("0.2"));

        let report = auditor.audit().unwrap();
        assert_eq!(report.inverted_watermarks, vec![addr.id]);
        assert_eq!(report.deposit_mismatches.len(), 1);
        assert_eq!(report.deposit_mismatches[0].applied_deposits, Decimal::ZERO);
    }

    #[test]
    fn unapplied_deposits_do_not_count() {
        let (store, _, auditor) = setup();
        let addr = Address::pooled("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", "pool", chrono::Utc::now());
        store.insert_address(addr.clone()).unwrap();
        store
            .insert_deposit(DepositTransaction::new(
                addr.id,
                None,
                d("0.3"),
                sample_txid(),
                1,
                chrono::Utc::now(),
            ))
            .unwrap();
        assert!(auditor.audit().unwrap().is_clean());
    }

    fn sample_txid() -> bitcoin::Txid {
        use bitcoin::hashes::Hash;
        bitcoin::Txid::from_byte_array([7u8; 32])
    }

    #[test]
    fn report_serializes_for_operators() {
        let (_, _, auditor) = setup();
        let json = serde_json::to_value(auditor.audit().unwrap()).unwrap();
        assert!(json["drift"].as_array().unwrap().is_empty());
        assert_eq!(json["supply"]["withdrawals"], "0");
    }
}
