//! Outgoing batcher: pays queued withdrawals with one on-chain transaction
//! and books the network fee back onto the withdrawing wallets.
//!
//! ```text
//! is_due? -> lock -> seal -> claim -> sendmany -> settle -> fee rows
//!                              |          |
//!                              |          +-- insufficient funds: release, retry later
//!                              |          +-- other failure: lock rows, manual
//!                              +-- claimed fewer than sealed: release, race lost
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use bitcoin::Txid;
use rust_decimal::Decimal;
use tokio::sync::watch;

use custody_ledger::Ledger;
use custody_node::BitcoinNode;
use custody_store::DistributedMutex;
use custody_types::constants::LOCK_PROCESS_OUTGOING;
use custody_types::{BatchId, LedgerError, Result, WalletId, WalletTransaction};

use crate::batch::{SealedBatch, seal};
use crate::fee_split::split_fee;
use crate::trigger::TriggerReceiver;

/// What one [`OutgoingBatcher::process`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing expired and the backlog is below the threshold.
    NotDue,
    /// Another worker holds the batch lock.
    LockBusy,
    /// Another writer claimed some of the selected rows first; this
    /// batch's claims were released.
    RaceLost { batch: BatchId },
    Settled {
        batch: BatchId,
        txid: Txid,
        paid: usize,
        /// Network fee, as a positive amount.
        fee: Decimal,
        /// Rows left pending because their destination was already paid.
        deferred: usize,
    },
    /// The node lacked funds; rows were released for a later batch.
    Deferred { batch: BatchId },
    /// The send failed for another reason; rows are locked for manual review.
    Failed { batch: BatchId, reason: String },
}

pub struct OutgoingBatcher {
    ledger: Arc<Ledger>,
    node: Arc<dyn BitcoinNode>,
    locks: DistributedMutex,
    /// Batches paid on chain whose fee lookup failed.
    unbooked: Mutex<Vec<(SealedBatch, Txid)>>,
}

impl OutgoingBatcher {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, node: Arc<dyn BitcoinNode>, locks: DistributedMutex) -> Self {
        Self {
            ledger,
            node,
            locks,
            unbooked: Mutex::new(Vec::new()),
        }
    }

    fn unbooked(&self) -> MutexGuard<'_, Vec<(SealedBatch, Txid)>> {
        self.unbooked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settled batches still waiting for their network fee to be booked.
    #[must_use]
    pub fn unbooked_fees(&self) -> Vec<(BatchId, Txid)> {
        self.unbooked().iter().map(|(b, txid)| (b.id, *txid)).collect()
    }

    /// Retry fee booking for every batch whose lookup failed earlier.
    /// Returns how many were booked.
    pub async fn retry_unbooked_fees(&self) -> usize {
        let pending = std::mem::take(&mut *self.unbooked());
        let mut booked = 0;
        for (batch, txid) in pending {
            if self.book_fee(&batch, txid).await.is_ok() {
                tracing::info!(batch = %batch.id, txid = %txid, "deferred fee booked");
                booked += 1;
            }
        }
        booked
    }

    /// True if some pending withdrawal has expired or the queue is backed up.
    pub fn is_due(&self) -> Result<bool> {
        let store = self.ledger.store();
        if store.count_expired_outgoing(self.ledger.clock().now())? > 0 {
            return Ok(true);
        }
        Ok(store.count_pending_outgoing()? > self.ledger.config().batch_backlog_threshold)
    }

    /// Run one batch if one is due. Fees left unbooked by an earlier batch
    /// are retried first.
    pub async fn process(&self) -> Result<BatchOutcome> {
        let has_unbooked = !self.unbooked().is_empty();
        if has_unbooked {
            self.retry_unbooked_fees().await;
        }
        if !self.is_due()? {
            return Ok(BatchOutcome::NotDue);
        }
        // Reach the node before claiming so an outage leaves rows untouched.
        self.node.block_count().await?;

        let Some(_guard) = self.locks.try_lock(LOCK_PROCESS_OUTGOING)? else {
            tracing::debug!("outgoing batch already running elsewhere");
            return Ok(BatchOutcome::LockBusy);
        };

        let store = self.ledger.store();
        let now = self.ledger.clock().now();
        let pending = store.pending_outgoing(self.ledger.config().batch_max_size)?;
        let batch = seal(pending, now);
        if batch.is_empty() {
            return Ok(BatchOutcome::NotDue);
        }
        if !batch.deferred.is_empty() {
            tracing::info!(
                batch = %batch.id,
                skipped = batch.deferred.len(),
                "duplicate destinations left for a later batch"
            );
        }

        let claimed = store.claim_outgoing(&batch.ids(), batch.id, now)?;
        if claimed != batch.len() {
            let released = store.release_outgoing(batch.id)?;
            tracing::warn!(
                batch = %batch.id,
                selected = batch.len(),
                claimed,
                released,
                "outgoing claim raced"
            );
            return Ok(BatchOutcome::RaceLost { batch: batch.id });
        }

        let txid = match self.node.send_many(&batch.payments()).await {
            Ok(txid) => txid,
            Err(e) if e.is_insufficient_funds() => {
                store.release_outgoing(batch.id)?;
                tracing::warn!(batch = %batch.id, total = %batch.total(), "node short of funds, batch released");
                return Ok(BatchOutcome::Deferred { batch: batch.id });
            }
            Err(e) => {
                let reason = e.to_string();
                let locked = store.fail_outgoing(batch.id, &reason)?;
                tracing::error!(batch = %batch.id, locked, error = %reason, "sendmany failed, batch locked");
                return Ok(BatchOutcome::Failed {
                    batch: batch.id,
                    reason,
                });
            }
        };

        store.settle_outgoing(batch.id, txid)?;
        tracing::info!(
            batch = %batch.id,
            hash = %batch.hash_hex(),
            txid = %txid,
            paid = batch.len(),
            total = %batch.total(),
            "batch sent"
        );

        let fee = self.book_fee(&batch, txid).await?;
        Ok(BatchOutcome::Settled {
            batch: batch.id,
            txid,
            paid: batch.len(),
            fee,
            deferred: batch.deferred.len(),
        })
    }

    /// Write the network fee row and one share per paid withdrawal, then
    /// bring the affected cached balances in line.
    async fn book_fee(&self, batch: &SealedBatch, txid: Txid) -> Result<Decimal> {
        let tx = match self.node.get_transaction(&txid).await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(
                    batch = %batch.id,
                    txid = %txid,
                    error = %e,
                    "fee lookup failed, booking queued for retry"
                );
                self.unbooked().push((batch.clone(), txid));
                return Err(e.into());
            }
        };
        if tx.fee > Decimal::ZERO {
            let err = LedgerError::integrity(format!("positive network fee {} on {txid}", tx.fee));
            tracing::error!(batch = %batch.id, error = %err, "fee not booked");
            return Err(err);
        }
        if tx.fee.is_zero() {
            return Ok(Decimal::ZERO);
        }

        let fee = -tx.fee;
        let store = self.ledger.store();
        let now = self.ledger.clock().now();
        let fee_wallet = self.ledger.fee_wallet()?.id;

        let mut rows = vec![WalletTransaction::network_fee(fee_wallet, txid, fee, now)];
        let mut deltas: BTreeMap<WalletId, Decimal> = BTreeMap::new();
        *deltas.entry(fee_wallet).or_default() -= fee;
        for (outgoing, share) in batch.outgoing.iter().zip(split_fee(fee, batch.len())) {
            let origin = store
                .withdrawal_for_outgoing(outgoing.id)?
                .and_then(|w| w.from_wallet)
                .ok_or_else(|| {
                    LedgerError::integrity(format!("no withdrawal row for {}", outgoing.id))
                })?;
            if share.is_zero() {
                continue;
            }
            rows.push(WalletTransaction::fee_share(
                origin,
                fee_wallet,
                outgoing.id,
                share,
                now,
            ));
            *deltas.entry(origin).or_default() -= share;
            *deltas.entry(fee_wallet).or_default() += share;
        }
        store.insert_wallet_transactions(rows)?;

        for (wallet, delta) in deltas.into_iter().filter(|(_, d)| !d.is_zero()) {
            self.ledger.adjust_cached_balance(wallet, delta);
            self.ledger.observers().balance_changed(wallet, delta);
            self.ledger.observers().balance_confirmed_changed(wallet, delta);
        }
        tracing::info!(batch = %batch.id, txid = %txid, fee = %fee, shares = batch.len(), "network fee booked");
        Ok(fee)
    }

    /// Scheduler loop. Wakes when a withdrawal is queued, when the earliest
    /// pending request expires, and at least every `tick`; exits when
    /// `shutdown` flips to true or its sender is dropped.
    ///
    /// After a pass that left expired rows pending (node down, short of
    /// funds, lock busy, race lost) the next pass waits a full `tick`.
    pub async fn run(
        self: Arc<Self>,
        mut trigger: TriggerReceiver,
        mut shutdown: watch::Receiver<bool>,
        tick: StdDuration,
    ) {
        let mut triggers_open = true;
        let mut backoff = false;
        tracing::info!(tick_ms = tick.as_millis(), "outgoing batcher started");
        loop {
            let wait = if backoff {
                tick
            } else {
                self.until_next_expiry(tick)
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                woke = trigger.recv(), if triggers_open => {
                    if woke.is_none() {
                        triggers_open = false;
                    }
                }
                () = tokio::time::sleep(wait) => {}
            }
            backoff = self.process_logged().await;
        }
        tracing::info!("outgoing batcher stopped");
    }

    fn until_next_expiry(&self, tick: StdDuration) -> StdDuration {
        match self.ledger.store().next_outgoing_expiry() {
            Ok(Some(at)) => (at - self.ledger.clock().now())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .min(tick),
            Ok(None) => tick,
            Err(e) => {
                tracing::warn!(error = %e, "could not read next expiry");
                tick
            }
        }
    }

    /// Returns true when the pass left due rows behind and the loop should
    /// wait a full tick before trying again.
    async fn process_logged(&self) -> bool {
        match self.process().await {
            Ok(BatchOutcome::NotDue) => false,
            Ok(BatchOutcome::LockBusy) => true,
            Ok(outcome @ (BatchOutcome::RaceLost { .. } | BatchOutcome::Deferred { .. })) => {
                tracing::debug!(?outcome, "batch processed");
                true
            }
            Ok(outcome) => {
                tracing::debug!(?outcome, "batch processed");
                false
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "batch processing halted");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch processing failed");
                true
            }
        }
    }
}

impl std::fmt::Debug for OutgoingBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingBatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_ledger::{RepairReceiver, repair_channel};
    use custody_ledger::test_support::fund;
    use custody_node::NodeError;
    use custody_node::mock::MockNode;
    use custody_store::{LedgerStore, MemoryCache, MemoryStore};
    use custody_types::{LedgerConfig, ManualClock, OutgoingStatus, TransactionKind};

    const A: &str = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";
    const B: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";
    const C: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    struct Setup {
        store: Arc<MemoryStore>,
        node: Arc<MockNode>,
        clock: Arc<ManualClock>,
        ledger: Arc<Ledger>,
        locks: DistributedMutex,
        repairs: RepairReceiver,
        batcher: OutgoingBatcher,
    }

    fn setup_with(config: LedgerConfig, fee: &str) -> Setup {
        let store = Arc::new(MemoryStore::new());
        let node = Arc::new(MockNode::builder().with_fee(d(fee)).build());
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let locks = DistributedMutex::new(cache, config.job_lock_ttl());
        let (queue, repairs) = repair_channel();
        let ledger = Arc::new(Ledger::new(store.clone(), clock.clone(), config, queue).unwrap());
        let batcher = OutgoingBatcher::new(ledger.clone(), node.clone(), locks.clone());
        Setup {
            store,
            node,
            clock,
            ledger,
            locks,
            repairs,
            batcher,
        }
    }

    fn setup(fee: &str) -> Setup {
        setup_with(LedgerConfig::default(), fee)
    }

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn funded(s: &Setup, amount: &str) -> WalletId {
        let w = s.ledger.create_wallet("user").unwrap().id;
        fund(&s.ledger, &s.store, w, d(amount));
        w
    }

    fn expire(s: &Setup) {
        s.clock.advance(chrono::Duration::seconds(6));
    }

    #[tokio::test]
    async fn nothing_due_before_expiry() {
        let s = setup("-0.0001");
        let w = funded(&s, "1");
        s.ledger.withdraw(w, A, d("0.5"), "", None).unwrap();
        assert!(!s.batcher.is_due().unwrap());
        assert_eq!(s.batcher.process().await.unwrap(), BatchOutcome::NotDue);
        assert!(s.node.sent().is_empty());
    }

    #[tokio::test]
    async fn fee_is_charged_to_the_withdrawing_wallet() {
        let s = setup("-0.0001");
        let w = funded(&s, "1.0");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);

        let outcome = s.batcher.process().await.unwrap();
        let BatchOutcome::Settled { txid, paid, fee, .. } = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!((paid, fee), (1, d("0.0001")));
        assert_eq!(s.store.outgoing(out.id).unwrap().unwrap().txid, Some(txid));

        assert_eq!(s.ledger.balance(w, 3).unwrap(), d("0.3999"));
        assert_eq!(s.ledger.audited_balance(w, 3).unwrap(), d("0.3999"));
        let fee_wallet = s.ledger.fee_wallet().unwrap();
        assert_eq!(fee_wallet.balance, Decimal::ZERO);
        assert_eq!(s.ledger.audited_balance(fee_wallet.id, 3).unwrap(), Decimal::ZERO);

        let kinds: Vec<_> = s
            .store
            .all_wallet_transactions()
            .unwrap()
            .iter()
            .map(WalletTransaction::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::Withdrawal,
                TransactionKind::NetworkFee,
                TransactionKind::FeeShare
            ]
        );
    }

    #[tokio::test]
    async fn fee_is_split_evenly_per_withdrawal() {
        let s = setup("-0.0001");
        let w1 = funded(&s, "1");
        let w2 = funded(&s, "1");
        s.ledger.withdraw(w1, A, d("0.1"), "", None).unwrap();
        s.ledger.withdraw(w1, B, d("0.1"), "", None).unwrap();
        s.ledger.withdraw(w2, C, d("0.5"), "", None).unwrap();
        expire(&s);

        s.batcher.process().await.unwrap();
        // 0.0001 / 3: first share absorbs the extra satoshi
        assert_eq!(s.ledger.balance(w1, 3).unwrap(), d("0.8") - d("0.00003334") - d("0.00003333"));
        assert_eq!(s.ledger.balance(w2, 3).unwrap(), d("0.5") - d("0.00003333"));
        for w in [w1, w2] {
            assert_eq!(
                s.ledger.balance(w, 3).unwrap(),
                s.ledger.audited_balance(w, 3).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn zero_fee_writes_no_fee_rows() {
        let s = setup("0");
        let w = funded(&s, "1");
        s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Settled { fee, .. } if fee.is_zero()));
        assert_eq!(s.store.all_wallet_transactions().unwrap().len(), 1);
        assert_eq!(s.ledger.balance(w, 3).unwrap(), d("0.4"));
    }

    #[tokio::test]
    async fn positive_fee_is_an_integrity_violation() {
        let s = setup("0.0001");
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        let err = s.batcher.process().await.unwrap_err();
        assert!(matches!(err, LedgerError::IntegrityViolation { .. }));
        // the payment went out; only the fee was not booked
        assert_eq!(
            s.store.outgoing(out.id).unwrap().unwrap().status(),
            OutgoingStatus::Settled
        );
    }

    #[tokio::test]
    async fn duplicate_destination_waits_for_the_next_batch() {
        let s = setup("0");
        let w = funded(&s, "1");
        let first = s.ledger.withdraw(w, A, d("0.3"), "", None).unwrap();
        let second = s.ledger.withdraw(w, A, d("0.2"), "", None).unwrap();
        expire(&s);

        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Settled { paid: 1, deferred: 1, .. }));
        assert!(s.store.outgoing(first.id).unwrap().unwrap().txid.is_some());
        assert!(s.store.outgoing(second.id).unwrap().unwrap().is_pending());

        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Settled { paid: 1, deferred: 0, .. }));
        let sent = s.node.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.get(A), Some(&d("0.3")));
        assert_eq!(sent[1].1.get(A), Some(&d("0.2")));
    }

    #[tokio::test]
    async fn insufficient_node_funds_releases_the_batch() {
        let s = setup("0");
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        s.node.fail_next_send(NodeError::insufficient_funds());

        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Deferred { .. }));
        let row = s.store.outgoing(out.id).unwrap().unwrap();
        assert!(row.is_pending());
        assert_eq!(row.batch, None);

        assert!(matches!(
            s.batcher.process().await.unwrap(),
            BatchOutcome::Settled { .. }
        ));
    }

    #[tokio::test]
    async fn other_send_failures_lock_the_batch() {
        let s = setup("0");
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        s.node.fail_next_send(NodeError::Rpc {
            code: -26,
            message: "bad-txns".into(),
        });

        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Failed { .. }));
        let row = s.store.outgoing(out.id).unwrap().unwrap();
        assert_eq!(row.status(), OutgoingStatus::Failed);
        assert!(row.failure.unwrap().contains("bad-txns"));

        // never retried automatically
        assert_eq!(s.batcher.process().await.unwrap(), BatchOutcome::NotDue);
        assert!(s.node.sent().is_empty());
        // the wallet stays debited until someone intervenes
        assert_eq!(s.ledger.balance(w, 3).unwrap(), d("0.4"));
    }

    #[tokio::test]
    async fn unreachable_node_leaves_rows_unclaimed() {
        let s = setup("0");
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        s.node.set_available(false);

        let err = s.batcher.process().await.unwrap_err();
        assert!(matches!(err, LedgerError::ExternalUnavailable(_)));
        assert!(s.store.outgoing(out.id).unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn failed_fee_lookup_keeps_the_txid() {
        let s = setup("-0.0001");
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        s.node.fail_get_transaction(true);

        assert!(s.batcher.process().await.is_err());
        let txid = s.store.outgoing(out.id).unwrap().unwrap().txid.unwrap();
        assert_eq!(s.store.all_wallet_transactions().unwrap().len(), 1);
        let unbooked = s.batcher.unbooked_fees();
        assert_eq!(unbooked.len(), 1);
        assert_eq!(unbooked[0].1, txid);

        // still down: stays queued
        assert_eq!(s.batcher.retry_unbooked_fees().await, 0);
        assert_eq!(s.batcher.unbooked_fees().len(), 1);

        s.node.fail_get_transaction(false);
        assert_eq!(s.batcher.process().await.unwrap(), BatchOutcome::NotDue);
        assert!(s.batcher.unbooked_fees().is_empty());
        assert_eq!(s.ledger.balance(w, 3).unwrap(), d("0.3999"));
        assert_eq!(s.ledger.audited_balance(w, 3).unwrap(), d("0.3999"));
    }

    #[tokio::test]
    async fn fee_debits_converge_when_a_cached_write_loses() {
        let mut s = setup("-0.0001");
        let w1 = funded(&s, "1");
        let w2 = funded(&s, "1");
        s.ledger.withdraw(w1, A, d("0.1"), "", None).unwrap();
        s.ledger.withdraw(w2, B, d("0.1"), "", None).unwrap();
        expire(&s);
        s.store.inject_fence_conflicts(w2, 1);

        assert!(matches!(
            s.batcher.process().await.unwrap(),
            BatchOutcome::Settled { paid: 2, .. }
        ));
        // w2's cached debit lost its fence and was queued for repair
        assert_eq!(s.ledger.balance(w2, 3).unwrap(), d("0.9"));
        assert_eq!(s.repairs.drain(&s.ledger), 1);

        let fee_wallet = s.ledger.fee_wallet().unwrap().id;
        for w in [w1, w2, fee_wallet] {
            assert_eq!(
                s.ledger.balance(w, 3).unwrap(),
                s.ledger.audited_balance(w, 3).unwrap()
            );
        }
        assert_eq!(s.ledger.balance(w2, 3).unwrap(), d("0.89995"));
    }

    #[tokio::test]
    async fn busy_lock_skips_the_batch() {
        let s = setup("0");
        let w = funded(&s, "1");
        s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        let _held = s.locks.try_lock(LOCK_PROCESS_OUTGOING).unwrap().unwrap();
        assert_eq!(s.batcher.process().await.unwrap(), BatchOutcome::LockBusy);
    }

    #[tokio::test]
    async fn backlog_triggers_early_and_batch_size_is_capped() {
        let config = LedgerConfig {
            batch_max_size: 2,
            batch_backlog_threshold: 2,
            ..LedgerConfig::default()
        };
        let s = setup_with(config, "0");
        let w = funded(&s, "1");
        for to in [A, B, C] {
            s.ledger
                .withdraw(w, to, d("0.1"), "", Some(chrono::Duration::hours(1)))
                .unwrap();
        }
        assert!(s.batcher.is_due().unwrap());

        let outcome = s.batcher.process().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Settled { paid: 2, .. }));
        assert_eq!(s.store.count_pending_outgoing().unwrap(), 1);
        assert!(!s.batcher.is_due().unwrap());
    }

    #[tokio::test]
    async fn run_loop_settles_on_expiry_and_stops() {
        let s = setup("0");
        let (trigger, rx) = crate::trigger::batch_trigger();
        let w = funded(&s, "1");
        let (stop, stopped) = watch::channel(false);

        let batcher = Arc::new(OutgoingBatcher::new(
            s.ledger.clone(),
            s.node.clone(),
            s.locks.clone(),
        ));
        let handle = tokio::spawn(batcher.run(rx, stopped, StdDuration::from_millis(10)));

        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        custody_types::OutgoingListener::on_outgoing_queued(&trigger, &out);
        expire(&s);

        for _ in 0..200 {
            if s.store.outgoing(out.id).unwrap().unwrap().txid.is_some() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        assert!(s.store.outgoing(out.id).unwrap().unwrap().txid.is_some());

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_loop_waits_a_tick_while_the_node_is_down() {
        let s = setup("0");
        let (_trigger, rx) = crate::trigger::batch_trigger();
        let w = funded(&s, "1");
        let out = s.ledger.withdraw(w, A, d("0.6"), "", None).unwrap();
        expire(&s);
        s.node.set_available(false);
        let (stop, stopped) = watch::channel(false);

        let batcher = Arc::new(OutgoingBatcher::new(
            s.ledger.clone(),
            s.node.clone(),
            s.locks.clone(),
        ));
        let handle = tokio::spawn(batcher.run(rx, stopped, StdDuration::from_secs(1)));
        tokio::time::sleep(StdDuration::from_millis(300)).await;

        let calls = s.node.block_count_calls();
        assert!((1..=2).contains(&calls), "{calls} block_count calls within one tick");
        assert!(s.store.outgoing(out.id).unwrap().unwrap().is_pending());

        stop.send(true).unwrap();
        handle.await.unwrap();
    }
}
