//! Fixtures shared by unit and integration tests.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rust_decimal::Decimal;

use custody_store::{LedgerStore, MemoryStore};
use custody_types::{Address, AddressId, WalletId};

use crate::ledger::Ledger;

static NEXT: AtomicU64 = AtomicU64::new(1);

/// Give `wallet` an already-confirmed legacy balance of `amount` and sync
/// its cached balance. Returns the backing address.
///
/// # Panics
/// On any store failure.
pub fn fund(ledger: &Ledger, store: &MemoryStore, wallet: WalletId, amount: Decimal) -> AddressId {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let mut addr = Address::pooled(format!("legacy-{n}"), "legacy", Utc::now());
    addr.wallet = Some(wallet);
    addr.active = true;
    addr.migrated = false;
    addr.received_unconfirmed = amount;
    addr.received_confirmed = amount;
    let id = addr.id;
    store.insert_address(addr).expect("insert funding address");
    ledger.repair_balance(wallet).expect("sync funded balance");
    id
}
