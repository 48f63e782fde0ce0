//! Balance and transfer authority.
//!
//! Every balance-changing operation follows the same protocol:
//!
//! ```text
//! read (balance, version) -> validate -> fenced write + ledger row (one store call)
//!     -> best-effort credit of the counterparty -> notify observers
//! ```
//!
//! A lost fence on the debited wallet is reported as
//! [`LedgerError::ConcurrencyConflict`] and nothing is written; the ledger
//! never retries on the caller's behalf. A lost fence on a credited wallet
//! queues that wallet for repair instead of failing the operation.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use custody_store::{LedgerStore, MergeSummary};
use custody_types::amount::quantize;
use custody_types::{
    BalanceObserver, Clock, LedgerConfig, LedgerError, Observers, OutgoingListener,
    OutgoingTransaction, Result, Wallet, WalletId, WalletTransaction,
};

use crate::outgoing_switch::OutgoingSwitch;
use crate::repair::RepairQueue;
use crate::validate::validate_address;

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    observers: Observers,
    outgoing_listener: Option<Arc<dyn OutgoingListener>>,
    switch: OutgoingSwitch,
    repairs: RepairQueue,
}

impl Ledger {
    /// # Errors
    /// [`LedgerError::Configuration`] if `config` fails validation.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
        repairs: RepairQueue,
    ) -> Result<Self> {
        config.validate()?;
        let switch = OutgoingSwitch::new(config.outgoing_enabled);
        Ok(Self {
            store,
            clock,
            config,
            observers: Observers::new(),
            outgoing_listener: None,
            switch,
            repairs,
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BalanceObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    #[must_use]
    pub fn with_outgoing_listener(mut self, listener: Arc<dyn OutgoingListener>) -> Self {
        self.outgoing_listener = Some(listener);
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    // -----------------------------------------------------------------
    // Wallets
    // -----------------------------------------------------------------

    pub fn create_wallet(&self, label: &str) -> Result<Wallet> {
        let wallet = Wallet::new(label, self.clock.now());
        self.store.insert_wallet(wallet.clone())?;
        tracing::info!(wallet = %wallet.id, label, "wallet created");
        Ok(wallet)
    }

    pub fn wallet(&self, id: WalletId) -> Result<Wallet> {
        self.store.wallet(id)?.ok_or(LedgerError::WalletNotFound(id))
    }

    /// The house wallet that pays network fees, created on first use.
    /// Concurrent first calls agree on a single wallet.
    pub fn fee_wallet(&self) -> Result<Wallet> {
        let label = &self.config.fee_wallet_label;
        if let Some(wallet) = self.store.wallet_by_label(label)? {
            return Ok(wallet);
        }
        let candidate = Wallet::new(label, self.clock.now());
        let wallet = self.store.insert_wallet_if_label_absent(candidate.clone())?;
        if wallet.id == candidate.id {
            tracing::info!(wallet = %wallet.id, label = %label, "fee wallet created");
        }
        Ok(wallet)
    }

    // -----------------------------------------------------------------
    // Balances
    // -----------------------------------------------------------------

    /// Confirmed balance from the cached field when `min_confirmations`
    /// reaches the configured threshold, otherwise the unconfirmed total
    /// computed from rows.
    pub fn balance(&self, wallet: WalletId, min_confirmations: u32) -> Result<Decimal> {
        if min_confirmations >= self.config.min_confirmations {
            Ok(self.wallet(wallet)?.balance)
        } else {
            self.wallet(wallet)?;
            Ok(self.store.wallet_totals(wallet)?.unconfirmed_balance())
        }
    }

    /// Same as [`Ledger::balance`] but always derived from rows.
    pub fn audited_balance(&self, wallet: WalletId, min_confirmations: u32) -> Result<Decimal> {
        self.wallet(wallet)?;
        let totals = self.store.wallet_totals(wallet)?;
        if min_confirmations >= self.config.min_confirmations {
            Ok(totals.confirmed_balance())
        } else {
            Ok(totals.unconfirmed_balance())
        }
    }

    /// What `wallet` may transfer right now.
    pub fn available_balance(&self, wallet: WalletId) -> Result<Decimal> {
        let w = self.wallet(wallet)?;
        self.spendable(&w)
    }

    fn spendable(&self, wallet: &Wallet) -> Result<Decimal> {
        if !self.config.unconfirmed_transfers {
            return Ok(wallet.balance);
        }
        let pending = self.store.wallet_totals(wallet.id)?.pending_receipts();
        Ok(wallet.balance + pending.max(Decimal::ZERO))
    }

    fn positive_amount(amount: Decimal) -> Result<Decimal> {
        let amount = quantize(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        Ok(amount)
    }

    // -----------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------

    /// Move `amount` from one wallet to another.
    pub fn transfer(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletTransaction> {
        let amount = Self::positive_amount(amount)?;
        if from == to {
            return Err(LedgerError::SelfTransfer(from));
        }
        let source = self.wallet(from)?;
        self.wallet(to)?;

        let available = self.spendable(&source)?;
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        let now = self.clock.now();
        let tx = WalletTransaction::transfer(from, to, amount, description, now);
        if self
            .store
            .debit_wallet(from, source.fence(), tx.clone(), now)?
            .is_none()
        {
            tracing::debug!(wallet = %from, version = source.version, "transfer lost fence");
            return Err(LedgerError::ConcurrencyConflict(from.to_string()));
        }

        self.adjust_cached_balance(to, amount);

        self.observers.balance_changed(from, -amount);
        self.observers.balance_confirmed_changed(from, -amount);
        self.observers.balance_changed(to, amount);
        self.observers.balance_confirmed_changed(to, amount);

        tracing::info!(
            tx = %tx.id,
            from = %from,
            to = %to,
            amount = %amount,
            "transfer committed"
        );
        Ok(tx)
    }

    /// Queue a payment to an external address.
    ///
    /// `expires_in` defaults to the configured outgoing delay; the batcher
    /// will not pay the request out before it expires unless the queue is
    /// backed up.
    pub fn withdraw(
        &self,
        from: WalletId,
        address: &str,
        amount: Decimal,
        description: &str,
        expires_in: Option<Duration>,
    ) -> Result<OutgoingTransaction> {
        self.switch.check()?;
        let address = validate_address(address, self.config.network)?;
        let amount = Self::positive_amount(amount)?;
        let source = self.wallet(from)?;

        if amount > source.balance {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: source.balance,
            });
        }

        let now = self.clock.now();
        let delay = expires_in.unwrap_or_else(|| self.config.outgoing_default_delay());
        let expires_at = now.checked_add_signed(delay).ok_or_else(|| {
            LedgerError::Internal(format!("outgoing expiry out of range: {delay}"))
        })?;
        let outgoing = OutgoingTransaction::new(&address, amount, now, expires_at);
        let tx = WalletTransaction::withdrawal(from, &address, outgoing.id, amount, description, now);

        if self
            .store
            .debit_wallet_for_withdrawal(from, source.fence(), outgoing.clone(), tx, now)?
            .is_none()
        {
            tracing::debug!(wallet = %from, version = source.version, "withdrawal lost fence");
            return Err(LedgerError::ConcurrencyConflict(from.to_string()));
        }

        self.observers.balance_changed(from, -amount);
        self.observers.balance_confirmed_changed(from, -amount);
        if let Some(listener) = &self.outgoing_listener {
            listener.on_outgoing_queued(&outgoing);
        }

        tracing::info!(
            outgoing = %outgoing.id,
            from = %from,
            to = %address,
            amount = %amount,
            expires_at = %outgoing.expires_at,
            "withdrawal queued"
        );
        Ok(outgoing)
    }

    pub fn set_outgoing_enabled(&self, enabled: bool) {
        self.switch.set_enabled(enabled);
    }

    pub fn outgoing_enabled(&self) -> bool {
        self.switch.is_enabled()
    }

    // -----------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------

    /// Fold `source` into `target`. Takes exclusive store access.
    pub fn merge_wallets(&self, source: WalletId, target: WalletId) -> Result<MergeSummary> {
        if source == target {
            return Err(LedgerError::SelfTransfer(source));
        }
        let summary = self.store.merge_wallets(source, target, self.clock.now())?;
        tracing::info!(
            source = %source,
            target = %target,
            addresses = summary.addresses_moved,
            moved = summary.transactions_moved,
            deleted = summary.transactions_deleted,
            balance = %summary.target_balance,
            "wallets merged"
        );
        Ok(summary)
    }

    /// Apply `delta` to the cached balance under the fence. On a lost fence
    /// the wallet is queued for repair. Returns whether the write landed.
    pub fn adjust_cached_balance(&self, wallet: WalletId, delta: Decimal) -> bool {
        let applied = self.wallet(wallet).and_then(|w| {
            self.store
                .compare_and_set_balance(wallet, w.fence(), w.balance + delta, self.clock.now())
        });
        match applied {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::debug!(wallet = %wallet, delta = %delta, "cached credit lost fence");
                self.schedule_repair(wallet);
                false
            }
            Err(e) => {
                tracing::warn!(wallet = %wallet, error = %e, "cached credit failed");
                self.schedule_repair(wallet);
                false
            }
        }
    }

    pub fn schedule_repair(&self, wallet: WalletId) {
        self.repairs.schedule(wallet);
    }

    /// Recompute the cached confirmed balance from rows and write it
    /// through the fence, retrying a bounded number of times.
    pub fn repair_balance(&self, wallet: WalletId) -> Result<Decimal> {
        for _ in 0..self.config.repair_attempts {
            let current = self.wallet(wallet)?;
            let audited = self.store.wallet_totals(wallet)?.confirmed_balance();
            if current.balance == audited {
                return Ok(audited);
            }
            if self
                .store
                .compare_and_set_balance(wallet, current.fence(), audited, self.clock.now())?
                .is_some()
            {
                tracing::info!(
                    wallet = %wallet,
                    cached = %current.balance,
                    audited = %audited,
                    "cached balance repaired"
                );
                return Ok(audited);
            }
        }
        Err(LedgerError::ConcurrencyConflict(wallet.to_string()))
    }

    /// Repair every wallet whose cached balance drifted. Returns the count.
    pub fn repair_all_balances(&self) -> Result<usize> {
        let mut fixed = 0;
        for wallet in self.store.wallets()? {
            let audited = self.store.wallet_totals(wallet.id)?.confirmed_balance();
            if wallet.balance != audited {
                self.repair_balance(wallet.id)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .field("outgoing_enabled", &self.switch.is_enabled())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
