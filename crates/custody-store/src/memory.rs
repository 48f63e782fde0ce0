//! In-memory [`LedgerStore`].
//!
//! All tables sit behind one mutex; each trait call takes it once, which
//! gives every call the atomicity of a single database transaction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use custody_types::{
    Address, AddressId, BatchId, ConfirmDeposit, ConfirmedDeposit, DepositId, DepositTransaction,
    LedgerError, OutgoingId, OutgoingStatus, OutgoingTransaction, Result, Wallet, WalletFence,
    WalletId, WalletTotals, WalletTransaction,
};

use crate::store::{LedgerStore, MergeSummary};

#[derive(Debug, Default)]
struct Tables {
    wallets: Vec<Wallet>,
    addresses: Vec<Address>,
    transactions: Vec<WalletTransaction>,
    deposits: Vec<DepositTransaction>,
    outgoing: Vec<OutgoingTransaction>,
    /// Forced fence misses per wallet (test hook).
    fence_conflicts: HashMap<WalletId, usize>,
}

impl Tables {
    fn wallet_mut(&mut self, id: WalletId) -> Result<&mut Wallet> {
        self.wallets
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(LedgerError::WalletNotFound(id))
    }

    /// Check the fence without writing anything.
    fn fence_holds(&mut self, id: WalletId, fence: WalletFence) -> Result<bool> {
        if let Some(left) = self.fence_conflicts.get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                return Ok(false);
            }
        }
        let wallet = self.wallet_mut(id)?;
        Ok(fence.matches(wallet.balance, wallet.version))
    }

    fn write_balance(&mut self, id: WalletId, balance: Decimal, now: DateTime<Utc>) -> Result<Wallet> {
        let wallet = self.wallet_mut(id)?;
        wallet.balance = balance;
        wallet.version += 1;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    fn totals(&self, id: WalletId) -> WalletTotals {
        let mut t = WalletTotals::default();
        for tx in &self.transactions {
            if tx.credits(id) {
                t.received += tx.amount;
                if tx.from_wallet.is_some() {
                    t.received_internal += tx.amount;
                }
            }
            if tx.debits(id) {
                t.sent += tx.amount;
            }
        }
        for addr in self.addresses.iter().filter(|a| a.wallet == Some(id)) {
            t.address_unconfirmed += addr.received_unconfirmed;
            t.address_confirmed += addr.received_confirmed;
            if !addr.migrated {
                t.legacy_confirmed += addr.received_confirmed;
            }
        }
        t
    }
}

/// Mutex-guarded tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` fenced writes on `wallet` miss, as if another
    /// writer had moved the version in between.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn inject_fence_conflicts(&self, wallet: WalletId, count: usize) {
        self.tables().fence_conflicts.insert(wallet, count);
    }

    /// Overwrite the cached balance without touching the version or rows.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn corrupt_cached_balance(&self, wallet: WalletId, balance: Decimal) {
        if let Some(w) = self.tables().wallets.iter_mut().find(|w| w.id == wallet) {
            w.balance = balance;
        }
    }

    /// Overwrite an address's watermarks.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn set_watermarks(&self, address: AddressId, unconfirmed: Decimal, confirmed: Decimal) {
        if let Some(a) = self.tables().addresses.iter_mut().find(|a| a.id == address) {
            a.received_unconfirmed = unconfirmed;
            a.received_confirmed = confirmed;
        }
    }

    /// Insert an address row skipping the unique-string constraint.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn force_insert_address(&self, address: Address) {
        self.tables().addresses.push(address);
    }
}

impl LedgerStore for MemoryStore {
    // -----------------------------------------------------------------
    // Wallets
    // -----------------------------------------------------------------

    fn insert_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut t = self.tables();
        if t.wallets.iter().any(|w| w.id == wallet.id) {
            return Err(LedgerError::Storage(format!("wallet {} already exists", wallet.id)));
        }
        t.wallets.push(wallet);
        Ok(())
    }

    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.tables().wallets.iter().find(|w| w.id == id).cloned())
    }

    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>> {
        Ok(self
            .tables()
            .wallets
            .iter()
            .find(|w| w.label == label)
            .cloned())
    }

    fn insert_wallet_if_label_absent(&self, wallet: Wallet) -> Result<Wallet> {
        let mut t = self.tables();
        if let Some(existing) = t.wallets.iter().find(|w| w.label == wallet.label) {
            return Ok(existing.clone());
        }
        t.wallets.push(wallet.clone());
        Ok(wallet)
    }

    fn wallets(&self) -> Result<Vec<Wallet>> {
        Ok(self.tables().wallets.clone())
    }

    fn compare_and_set_balance(
        &self,
        id: WalletId,
        fence: WalletFence,
        new_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        let mut t = self.tables();
        if !t.fence_holds(id, fence)? {
            return Ok(None);
        }
        t.write_balance(id, new_balance, now).map(Some)
    }

    fn debit_wallet(
        &self,
        id: WalletId,
        fence: WalletFence,
        tx: WalletTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        let mut t = self.tables();
        if !t.fence_holds(id, fence)? {
            return Ok(None);
        }
        let wallet = t.write_balance(id, fence.balance - tx.amount, now)?;
        t.transactions.push(tx);
        Ok(Some(wallet))
    }

    fn debit_wallet_for_withdrawal(
        &self,
        id: WalletId,
        fence: WalletFence,
        outgoing: OutgoingTransaction,
        tx: WalletTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>> {
        let mut t = self.tables();
        if !t.fence_holds(id, fence)? {
            return Ok(None);
        }
        let wallet = t.write_balance(id, fence.balance - tx.amount, now)?;
        t.outgoing.push(outgoing);
        t.transactions.push(tx);
        Ok(Some(wallet))
    }

    fn wallet_totals(&self, id: WalletId) -> Result<WalletTotals> {
        Ok(self.tables().totals(id))
    }

    fn merge_wallets(
        &self,
        source: WalletId,
        target: WalletId,
        now: DateTime<Utc>,
    ) -> Result<MergeSummary> {
        let mut t = self.tables();
        t.wallet_mut(source)?;
        t.wallet_mut(target)?;

        let mut summary = MergeSummary::default();
        for addr in t.addresses.iter_mut().filter(|a| a.wallet == Some(source)) {
            addr.wallet = Some(target);
            summary.addresses_moved += 1;
        }
        for dep in t.deposits.iter_mut().filter(|d| d.wallet == Some(source)) {
            dep.wallet = Some(target);
            summary.deposits_moved += 1;
        }
        for tx in &mut t.transactions {
            let mut touched = false;
            if tx.from_wallet == Some(source) {
                tx.from_wallet = Some(target);
                touched = true;
            }
            if tx.to_wallet == Some(source) {
                tx.to_wallet = Some(target);
                touched = true;
            }
            if touched {
                summary.transactions_moved += 1;
            }
        }
        let before = t.transactions.len();
        t.transactions
            .retain(|tx| !(tx.from_wallet == Some(target) && tx.to_wallet == Some(target)));
        summary.transactions_deleted = before - t.transactions.len();

        summary.target_balance = t.totals(target).confirmed_balance();
        t.write_balance(source, Decimal::ZERO, now)?;
        t.write_balance(target, summary.target_balance, now)?;
        Ok(summary)
    }

    // -----------------------------------------------------------------
    // Wallet transactions
    // -----------------------------------------------------------------

    fn insert_wallet_transactions(&self, rows: Vec<WalletTransaction>) -> Result<()> {
        self.tables().transactions.extend(rows);
        Ok(())
    }

    fn wallet_transactions(&self, wallet: WalletId) -> Result<Vec<WalletTransaction>> {
        Ok(self
            .tables()
            .transactions
            .iter()
            .filter(|tx| tx.involves(wallet))
            .cloned()
            .collect())
    }

    fn all_wallet_transactions(&self) -> Result<Vec<WalletTransaction>> {
        Ok(self.tables().transactions.clone())
    }

    fn withdrawal_for_outgoing(&self, outgoing: OutgoingId) -> Result<Option<WalletTransaction>> {
        Ok(self
            .tables()
            .transactions
            .iter()
            .find(|tx| tx.outgoing == Some(outgoing) && !tx.fee)
            .cloned())
    }

    // -----------------------------------------------------------------
    // Addresses
    // -----------------------------------------------------------------

    fn insert_address(&self, address: Address) -> Result<()> {
        let mut t = self.tables();
        if t.addresses.iter().any(|a| a.address == address.address) {
            return Err(LedgerError::DuplicateAddress {
                address: address.address,
            });
        }
        t.addresses.push(address);
        Ok(())
    }

    fn address(&self, id: AddressId) -> Result<Option<Address>> {
        Ok(self.tables().addresses.iter().find(|a| a.id == id).cloned())
    }

    fn addresses_by_string(&self, address: &str) -> Result<Vec<Address>> {
        Ok(self
            .tables()
            .addresses
            .iter()
            .filter(|a| a.address == address)
            .cloned()
            .collect())
    }

    fn addresses_for_wallet(&self, wallet: WalletId) -> Result<Vec<Address>> {
        Ok(self
            .tables()
            .addresses
            .iter()
            .filter(|a| a.wallet == Some(wallet) && a.active)
            .cloned()
            .collect())
    }

    fn addresses(&self) -> Result<Vec<Address>> {
        Ok(self.tables().addresses.clone())
    }

    fn pool_candidates(&self, limit: usize) -> Result<Vec<Address>> {
        Ok(self
            .tables()
            .addresses
            .iter()
            .filter(|a| a.is_pool_candidate())
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_pool(&self) -> Result<usize> {
        Ok(self
            .tables()
            .addresses
            .iter()
            .filter(|a| a.is_pool_candidate())
            .count())
    }

    fn reserve_pool_address(&self, id: AddressId) -> Result<bool> {
        let mut t = self.tables();
        match t
            .addresses
            .iter_mut()
            .find(|a| a.id == id && a.is_pool_candidate())
        {
            Some(addr) => {
                addr.active = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn assign_address(&self, id: AddressId, wallet: WalletId) -> Result<bool> {
        let mut t = self.tables();
        match t
            .addresses
            .iter_mut()
            .find(|a| a.id == id && a.active && a.wallet.is_none() && a.is_unused())
        {
            Some(addr) => {
                addr.wallet = Some(wallet);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn advance_unconfirmed(&self, id: AddressId, previous: Decimal, new: Decimal) -> Result<bool> {
        let mut t = self.tables();
        match t
            .addresses
            .iter_mut()
            .find(|a| a.id == id && a.received_unconfirmed == previous)
        {
            Some(addr) => {
                addr.received_unconfirmed = new;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -----------------------------------------------------------------
    // Deposits
    // -----------------------------------------------------------------

    fn insert_deposit(&self, deposit: DepositTransaction) -> Result<DepositTransaction> {
        let mut t = self.tables();
        if let Some(existing) = t
            .deposits
            .iter()
            .find(|d| {
                d.address == deposit.address && d.txid == deposit.txid && d.amount == deposit.amount
            })
        {
            return Ok(existing.clone());
        }
        t.deposits.push(deposit.clone());
        Ok(deposit)
    }

    fn deposit(&self, id: DepositId) -> Result<Option<DepositTransaction>> {
        Ok(self.tables().deposits.iter().find(|d| d.id == id).cloned())
    }

    fn find_deposit(
        &self,
        address: AddressId,
        txid: &Txid,
        amount: Decimal,
    ) -> Result<Option<DepositTransaction>> {
        Ok(self
            .tables()
            .deposits
            .iter()
            .find(|d| d.address == address && &d.txid == txid && d.amount == amount)
            .cloned())
    }

    fn deposits_for_address(&self, address: AddressId) -> Result<Vec<DepositTransaction>> {
        Ok(self
            .tables()
            .deposits
            .iter()
            .filter(|d| d.address == address)
            .cloned()
            .collect())
    }

    fn update_deposit_confirmations(&self, id: DepositId, confirmations: u32) -> Result<bool> {
        let mut t = self.tables();
        match t
            .deposits
            .iter_mut()
            .find(|d| d.id == id && d.confirmations < confirmations)
        {
            Some(dep) => {
                dep.confirmations = confirmations;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn confirm_deposit(&self, op: ConfirmDeposit) -> Result<Option<ConfirmedDeposit>> {
        let mut t = self.tables();

        let Some(dep_idx) = t
            .deposits
            .iter()
            .position(|d| d.id == op.deposit && !d.is_applied())
        else {
            return Ok(None);
        };
        let Some(addr_idx) = t
            .addresses
            .iter()
            .position(|a| a.id == op.address && a.received_confirmed == op.previous_confirmed)
        else {
            return Ok(None);
        };

        let addr = &mut t.addresses[addr_idx];
        addr.received_confirmed = op.new_confirmed;
        if addr.received_unconfirmed < op.new_confirmed {
            addr.received_unconfirmed = op.new_confirmed;
        }
        let address = addr.clone();

        let dep = &mut t.deposits[dep_idx];
        dep.locked = true;
        if let Some(credit) = &op.credit {
            dep.wallet_transaction = Some(credit.id);
        }
        let deposit = dep.clone();

        if let Some(credit) = &op.credit {
            t.transactions.push(credit.clone());
        }
        Ok(Some(ConfirmedDeposit {
            deposit,
            address,
            credit: op.credit,
        }))
    }

    // -----------------------------------------------------------------
    // Outgoing transactions
    // -----------------------------------------------------------------

    fn outgoing(&self, id: OutgoingId) -> Result<Option<OutgoingTransaction>> {
        Ok(self.tables().outgoing.iter().find(|o| o.id == id).cloned())
    }

    fn pending_outgoing(&self, limit: usize) -> Result<Vec<OutgoingTransaction>> {
        let mut pending: Vec<OutgoingTransaction> = self
            .tables()
            .outgoing
            .iter()
            .filter(|o| o.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|o| (o.expires_at, o.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    fn count_pending_outgoing(&self) -> Result<usize> {
        Ok(self
            .tables()
            .outgoing
            .iter()
            .filter(|o| o.is_pending())
            .count())
    }

    fn count_expired_outgoing(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .tables()
            .outgoing
            .iter()
            .filter(|o| o.is_expired(now))
            .count())
    }

    fn next_outgoing_expiry(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .tables()
            .outgoing
            .iter()
            .filter(|o| o.is_pending())
            .map(|o| o.expires_at)
            .min())
    }

    fn claim_outgoing(
        &self,
        ids: &[OutgoingId],
        batch: BatchId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut t = self.tables();
        let mut claimed = 0;
        for row in t
            .outgoing
            .iter_mut()
            .filter(|o| ids.contains(&o.id) && o.is_pending())
        {
            row.executed_at = Some(now);
            row.batch = Some(batch);
            claimed += 1;
        }
        Ok(claimed)
    }

    fn release_outgoing(&self, batch: BatchId) -> Result<usize> {
        let mut t = self.tables();
        let mut released = 0;
        for row in t
            .outgoing
            .iter_mut()
            .filter(|o| o.batch == Some(batch) && o.status() == OutgoingStatus::Claimed)
        {
            row.executed_at = None;
            row.batch = None;
            released += 1;
        }
        Ok(released)
    }

    fn fail_outgoing(&self, batch: BatchId, detail: &str) -> Result<usize> {
        let mut t = self.tables();
        let mut failed = 0;
        for row in t
            .outgoing
            .iter_mut()
            .filter(|o| o.batch == Some(batch) && o.status() == OutgoingStatus::Claimed)
        {
            row.locked = true;
            row.failure = Some(detail.to_string());
            failed += 1;
        }
        Ok(failed)
    }

    fn settle_outgoing(&self, batch: BatchId, txid: Txid) -> Result<usize> {
        let mut t = self.tables();
        let mut settled = 0;
        for row in t
            .outgoing
            .iter_mut()
            .filter(|o| o.batch == Some(batch) && o.status() == OutgoingStatus::Claimed)
        {
            row.txid = Some(txid);
            settled += 1;
        }
        Ok(settled)
    }

    fn outgoing_in_batch(&self, batch: BatchId) -> Result<Vec<OutgoingTransaction>> {
        Ok(self
            .tables()
            .outgoing
            .iter()
            .filter(|o| o.batch == Some(batch))
            .cloned()
            .collect())
    }

    fn all_outgoing(&self) -> Result<Vec<OutgoingTransaction>> {
        Ok(self.tables().outgoing.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
