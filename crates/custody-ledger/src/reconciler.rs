//! Deposit reconciliation.
//!
//! Polls the node for receipts at our addresses and drives each
//! (address, txid) through
//!
//! ```text
//! unseen -> unconfirmed -> confirmed
//! ```
//!
//! Address watermarks only ever move forward through conditional writes,
//! and confirmation goes through one atomic store gate, so replaying a
//! poll (or racing another poller) can never credit a receipt twice.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use rust_decimal::Decimal;

use custody_node::{BitcoinNode, CachingNode, Category, ReceivedEntry};
use custody_store::{DistributedMutex, KvCache};
use custody_types::amount::quantize;
use custody_types::constants::{CACHE_QUERIED_BLOCK_INDEX, LOCK_QUERY_NODE, LOCK_QUERY_TRANSACTIONS};
use custody_types::{
    AddressId, ConfirmDeposit, DepositId, DepositTransaction, LedgerError, Result,
    WalletTransaction,
};

use crate::ledger::Ledger;

/// Result of [`DepositReconciler::apply_unconfirmed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnconfirmedOutcome {
    /// The unconfirmed watermark moved up by `delta`.
    Advanced { delta: Decimal },
    /// The node reports nothing new.
    Unchanged,
    /// Another writer moved the watermark first.
    Raced,
}

/// Result of [`DepositReconciler::apply_confirmed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied { amount: Decimal },
    /// Already locked or linked; nothing to do.
    AlreadyApplied,
    /// The node has not yet confirmed enough beyond the watermark, or the
    /// node lock was busy. Retried on the next poll.
    Deferred,
    /// The conditional gate matched no rows; another writer got there first.
    Aborted,
}

/// Tally of one [`DepositReconciler::poll`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Another poller held the lock; nothing was done.
    pub skipped: bool,
    pub from_height: u64,
    pub entries: usize,
    pub unknown_addresses: usize,
    pub unconfirmed: usize,
    pub confirmed: usize,
    pub already_applied: usize,
    pub aborted: usize,
    pub deferred: usize,
    /// Height stored as the next starting point, if the poll completed.
    pub watermark: Option<u64>,
}

enum EntryOutcome {
    UnknownAddress,
    Unconfirmed,
    Confirmed(ConfirmOutcome),
}

pub struct DepositReconciler {
    ledger: Arc<Ledger>,
    node: Arc<dyn BitcoinNode>,
    /// Short-TTL view of `total_received` for the unconfirmed watermark.
    /// The confirmation gate always asks `node` directly.
    received: CachingNode,
    cache: Arc<dyn KvCache>,
    locks: DistributedMutex,
}

impl DepositReconciler {
    #[must_use]
    pub fn new(
        ledger: Arc<Ledger>,
        node: Arc<dyn BitcoinNode>,
        cache: Arc<dyn KvCache>,
        locks: DistributedMutex,
    ) -> Self {
        let received = CachingNode::new(
            node.clone(),
            ledger.clock().clone(),
            ledger.config().received_cache_ttl(),
        );
        Self {
            ledger,
            node,
            received,
            cache,
            locks,
        }
    }

    fn min_confirmations(&self) -> u32 {
        self.ledger.config().min_confirmations
    }

    /// One reconciliation pass over everything the node reports since the
    /// stored block watermark.
    pub async fn poll(&self) -> Result<PollReport> {
        let Some(_guard) = self.locks.try_lock(LOCK_QUERY_TRANSACTIONS)? else {
            tracing::debug!("deposit poll already running elsewhere");
            return Ok(PollReport {
                skipped: true,
                ..PollReport::default()
            });
        };

        let block_count = self.node.block_count().await?;
        let safe_height = block_count.saturating_sub(u64::from(self.min_confirmations()) + 1);
        let stored = self
            .cache
            .get(CACHE_QUERIED_BLOCK_INDEX)?
            .and_then(|v| v.parse::<u64>().ok());
        let from_height = match stored {
            Some(h) => h.min(safe_height),
            None => block_count.saturating_sub(self.ledger.config().initial_scan_depth),
        };

        let since = self.node.block_hash(from_height).await?;
        let entries = self.node.list_since_block(&since).await?;

        let mut report = PollReport {
            from_height,
            ..PollReport::default()
        };
        for entry in entries.iter().filter(|e| e.category == Category::Receive) {
            report.entries += 1;
            match self.reconcile_entry(entry).await {
                Ok(EntryOutcome::UnknownAddress) => report.unknown_addresses += 1,
                Ok(EntryOutcome::Unconfirmed) => report.unconfirmed += 1,
                Ok(EntryOutcome::Confirmed(outcome)) => match outcome {
                    ConfirmOutcome::Applied { .. } => report.confirmed += 1,
                    ConfirmOutcome::AlreadyApplied => report.already_applied += 1,
                    ConfirmOutcome::Deferred => report.deferred += 1,
                    ConfirmOutcome::Aborted => report.aborted += 1,
                },
                Err(e) if e.is_fatal() => {
                    tracing::error!(address = %entry.address, txid = %entry.txid, error = %e, "deposit poll halted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(address = %entry.address, txid = %entry.txid, error = %e, "deposit deferred");
                    report.deferred += 1;
                }
            }
        }

        if report.deferred == 0 {
            self.cache
                .set(CACHE_QUERIED_BLOCK_INDEX, &safe_height.to_string(), None)?;
            report.watermark = Some(safe_height);
        }
        tracing::info!(
            from = report.from_height,
            entries = report.entries,
            confirmed = report.confirmed,
            deferred = report.deferred,
            "deposit poll finished"
        );
        Ok(report)
    }

    async fn reconcile_entry(&self, entry: &ReceivedEntry) -> Result<EntryOutcome> {
        let store = self.ledger.store();
        let mut rows = store.addresses_by_string(&entry.address)?;
        let address = match rows.len() {
            0 => {
                tracing::debug!(address = %entry.address, "receipt at unknown address");
                return Ok(EntryOutcome::UnknownAddress);
            }
            1 => rows.remove(0),
            n => {
                tracing::error!(address = %entry.address, rows = n, "duplicate address rows");
                return Err(LedgerError::DuplicateAddress {
                    address: entry.address.clone(),
                });
            }
        };

        let deposit = store.insert_deposit(DepositTransaction::new(
            address.id,
            address.wallet,
            quantize(entry.amount),
            entry.txid,
            entry.confirmations,
            self.ledger.clock().now(),
        ))?;
        if deposit.is_applied() {
            return Ok(EntryOutcome::Confirmed(ConfirmOutcome::AlreadyApplied));
        }
        if entry.confirmations > deposit.confirmations {
            store.update_deposit_confirmations(deposit.id, entry.confirmations)?;
        }

        if entry.confirmations < self.min_confirmations() {
            self.apply_unconfirmed(address.id).await?;
            Ok(EntryOutcome::Unconfirmed)
        } else {
            self.apply_confirmed(deposit.id)
                .await
                .map(EntryOutcome::Confirmed)
        }
    }

    /// Advance the address's unconfirmed watermark to what the node reports
    /// at zero confirmations.
    pub async fn apply_unconfirmed(&self, address: AddressId) -> Result<UnconfirmedOutcome> {
        let store = self.ledger.store();
        let current = store
            .address(address)?
            .ok_or(LedgerError::AddressNotFound(address))?;
        let total = quantize(self.received.total_received(&current.address, 0).await?);

        // Re-read: the node call may have taken a while.
        let current = store
            .address(address)?
            .ok_or(LedgerError::AddressNotFound(address))?;
        if total <= current.received_unconfirmed {
            return Ok(UnconfirmedOutcome::Unchanged);
        }
        if !store.advance_unconfirmed(address, current.received_unconfirmed, total)? {
            tracing::debug!(address = %current.address, "unconfirmed watermark raced");
            return Ok(UnconfirmedOutcome::Raced);
        }

        let delta = total - current.received_unconfirmed;
        if let Some(wallet) = current.wallet {
            self.ledger.observers().balance_changed(wallet, delta);
        }
        tracing::info!(address = %current.address, delta = %delta, "unconfirmed receipt");
        Ok(UnconfirmedOutcome::Advanced { delta })
    }

    /// Apply one confirmed deposit exactly once.
    pub async fn apply_confirmed(&self, deposit: DepositId) -> Result<ConfirmOutcome> {
        let store = self.ledger.store();
        let dep = store
            .deposit(deposit)?
            .ok_or_else(|| LedgerError::Internal(format!("deposit {deposit} vanished")))?;
        if dep.is_applied() {
            return Ok(ConfirmOutcome::AlreadyApplied);
        }

        let wait = StdDuration::from_secs(self.ledger.config().job_lock_ttl_secs);
        let Some(_guard) = self.locks.lock(LOCK_QUERY_NODE, wait).await? else {
            tracing::warn!(deposit = %deposit, "node lock busy, confirmation deferred");
            return Ok(ConfirmOutcome::Deferred);
        };

        let address = store
            .address(dep.address)?
            .ok_or(LedgerError::AddressNotFound(dep.address))?;
        let node_confirmed = quantize(
            self.node
                .total_received(&address.address, self.min_confirmations())
                .await?,
        );
        let new_confirmed = address.received_confirmed + dep.amount;
        if node_confirmed < new_confirmed {
            tracing::debug!(
                address = %address.address,
                node = %node_confirmed,
                needed = %new_confirmed,
                "node has not confirmed enough yet"
            );
            return Ok(ConfirmOutcome::Deferred);
        }

        let now = self.ledger.clock().now();
        let credit = match address.wallet {
            Some(wallet) if address.migrated => Some(WalletTransaction::deposit(
                wallet, dep.id, address.id, dep.amount, now,
            )),
            _ => None,
        };
        let op = ConfirmDeposit {
            deposit: dep.id,
            address: address.id,
            previous_confirmed: address.received_confirmed,
            new_confirmed,
            credit,
        };
        let Some(done) = store.confirm_deposit(op)? else {
            tracing::warn!(deposit = %deposit, address = %address.address, "confirmation gate matched nothing");
            return Ok(ConfirmOutcome::Aborted);
        };

        if let Some(wallet) = done.address.wallet {
            self.ledger.adjust_cached_balance(wallet, dep.amount);
            self.ledger
                .observers()
                .balance_confirmed_changed(wallet, dep.amount);
        }
        tracing::info!(
            deposit = %deposit,
            address = %address.address,
            txid = %dep.txid,
            amount = %dep.amount,
            "deposit confirmed"
        );
        Ok(ConfirmOutcome::Applied { amount: dep.amount })
    }
}

impl std::fmt::Debug for DepositReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositReconciler").finish_non_exhaustive()
    }
}
