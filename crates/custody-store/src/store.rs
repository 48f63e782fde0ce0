//! The persistence boundary.
//!
//! Every method is one atomic unit against the backing store (one SQL
//! statement or transaction in a relational backend). Conditional writes
//! report whether they matched through `bool`, `Option` or a row count;
//! callers decide what a miss means.

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use custody_types::{
    Address, AddressId, BatchId, ConfirmDeposit, ConfirmedDeposit, DepositId, DepositTransaction,
    OutgoingId, OutgoingTransaction, Result, Wallet, WalletFence, WalletId, WalletTotals,
    WalletTransaction,
};

/// Row counts touched by a wallet merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub addresses_moved: usize,
    pub deposits_moved: usize,
    pub transactions_moved: usize,
    pub transactions_deleted: usize,
    /// Target balance recomputed from rows after the merge.
    pub target_balance: Decimal,
}

/// Storage operations used by the ledger.
pub trait LedgerStore: Send + Sync {
    // -----------------------------------------------------------------
    // Wallets
    // -----------------------------------------------------------------

    fn insert_wallet(&self, wallet: Wallet) -> Result<()>;

    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>>;

    /// Oldest wallet carrying `label`.
    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>>;

    /// Insert `wallet` unless a wallet with the same label exists. Returns
    /// whichever wallet holds the label afterwards; check and insert are
    /// one atomic step.
    fn insert_wallet_if_label_absent(&self, wallet: Wallet) -> Result<Wallet>;

    fn wallets(&self) -> Result<Vec<Wallet>>;

    /// Write `new_balance` and bump the version if the fence still matches.
    fn compare_and_set_balance(
        &self,
        id: WalletId,
        fence: WalletFence,
        new_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>>;

    /// Decrement the balance by `tx.amount` under the fence and append `tx`,
    /// as one unit. `None` when the fence moved; nothing is written then.
    fn debit_wallet(
        &self,
        id: WalletId,
        fence: WalletFence,
        tx: WalletTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>>;

    /// Like [`LedgerStore::debit_wallet`], also inserting the outgoing row
    /// that `tx` links to.
    fn debit_wallet_for_withdrawal(
        &self,
        id: WalletId,
        fence: WalletFence,
        outgoing: OutgoingTransaction,
        tx: WalletTransaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Wallet>>;

    /// Aggregates over the wallet's rows and owned addresses.
    fn wallet_totals(&self, id: WalletId) -> Result<WalletTotals>;

    /// Move everything owned or referenced by `source` to `target`.
    ///
    /// Rows that become self-referential are deleted, the source balance is
    /// zeroed and the target balance is recomputed from rows. Both versions
    /// are bumped. Runs under exclusive access.
    fn merge_wallets(
        &self,
        source: WalletId,
        target: WalletId,
        now: DateTime<Utc>,
    ) -> Result<MergeSummary>;

    // -----------------------------------------------------------------
    // Wallet transactions
    // -----------------------------------------------------------------

    /// Append rows as one unit.
    fn insert_wallet_transactions(&self, rows: Vec<WalletTransaction>) -> Result<()>;

    /// Rows touching `wallet`, oldest first.
    fn wallet_transactions(&self, wallet: WalletId) -> Result<Vec<WalletTransaction>>;

    fn all_wallet_transactions(&self) -> Result<Vec<WalletTransaction>>;

    /// The withdrawal row that created an outgoing transaction.
    fn withdrawal_for_outgoing(&self, outgoing: OutgoingId) -> Result<Option<WalletTransaction>>;

    // -----------------------------------------------------------------
    // Addresses
    // -----------------------------------------------------------------

    fn insert_address(&self, address: Address) -> Result<()>;

    fn address(&self, id: AddressId) -> Result<Option<Address>>;

    /// All rows for one address string. More than one is corruption.
    fn addresses_by_string(&self, address: &str) -> Result<Vec<Address>>;

    /// Active addresses owned by `wallet`, oldest first.
    fn addresses_for_wallet(&self, wallet: WalletId) -> Result<Vec<Address>>;

    fn addresses(&self) -> Result<Vec<Address>>;

    /// Unreserved pool addresses, oldest first.
    fn pool_candidates(&self, limit: usize) -> Result<Vec<Address>>;

    fn count_pool(&self) -> Result<usize>;

    /// `active = true` where still unreserved, unowned and unused.
    fn reserve_pool_address(&self, id: AddressId) -> Result<bool>;

    /// `wallet = wallet` where reserved, unowned and unused.
    fn assign_address(&self, id: AddressId, wallet: WalletId) -> Result<bool>;

    /// Raise `received_unconfirmed` from `previous` to `new`.
    fn advance_unconfirmed(&self, id: AddressId, previous: Decimal, new: Decimal) -> Result<bool>;

    // -----------------------------------------------------------------
    // Deposits
    // -----------------------------------------------------------------

    /// Insert, or return the row already stored for the same
    /// (address, txid, amount). Two outputs of one transaction paying the
    /// same address get separate rows unless their amounts are equal too,
    /// in which case the second is never credited.
    fn insert_deposit(&self, deposit: DepositTransaction) -> Result<DepositTransaction>;

    fn deposit(&self, id: DepositId) -> Result<Option<DepositTransaction>>;

    fn find_deposit(
        &self,
        address: AddressId,
        txid: &Txid,
        amount: Decimal,
    ) -> Result<Option<DepositTransaction>>;

    fn deposits_for_address(&self, address: AddressId) -> Result<Vec<DepositTransaction>>;

    /// Raise the confirmation count; never lowers it.
    fn update_deposit_confirmations(&self, id: DepositId, confirmations: u32) -> Result<bool>;

    /// The exactly-once confirmation gate. See [`ConfirmDeposit`].
    fn confirm_deposit(&self, op: ConfirmDeposit) -> Result<Option<ConfirmedDeposit>>;

    // -----------------------------------------------------------------
    // Outgoing transactions
    // -----------------------------------------------------------------

    fn outgoing(&self, id: OutgoingId) -> Result<Option<OutgoingTransaction>>;

    /// Pending rows ordered by `expires_at`, then `created_at`.
    fn pending_outgoing(&self, limit: usize) -> Result<Vec<OutgoingTransaction>>;

    fn count_pending_outgoing(&self) -> Result<usize>;

    fn count_expired_outgoing(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Earliest expiry among pending rows.
    fn next_outgoing_expiry(&self) -> Result<Option<DateTime<Utc>>>;

    /// Stamp `executed_at` and `batch` on the listed rows still pending.
    /// Returns how many were claimed.
    fn claim_outgoing(&self, ids: &[OutgoingId], batch: BatchId, now: DateTime<Utc>)
    -> Result<usize>;

    /// Return a batch's unsettled claims to pending.
    fn release_outgoing(&self, batch: BatchId) -> Result<usize>;

    /// Lock a batch's rows out of automatic processing.
    fn fail_outgoing(&self, batch: BatchId, detail: &str) -> Result<usize>;

    /// Record the paying transaction on a batch's rows.
    fn settle_outgoing(&self, batch: BatchId, txid: Txid) -> Result<usize>;

    fn outgoing_in_batch(&self, batch: BatchId) -> Result<Vec<OutgoingTransaction>>;

    fn all_outgoing(&self) -> Result<Vec<OutgoingTransaction>>;
}
