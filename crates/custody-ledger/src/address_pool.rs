//! Pool of unused receiving addresses.
//!
//! Handing out an address is a two-step claim, each step a conditional
//! write: reserve a pool row (`active: false -> true`), then assign it to
//! the wallet (`wallet: NULL -> id`). Losing the reserve moves on to the
//! next candidate; losing the assign is reported to the caller.

use std::sync::Arc;

use custody_node::BitcoinNode;
use custody_store::LedgerStore;
use custody_types::{Address, Clock, LedgerConfig, LedgerError, Result, WalletId};

/// Reserve attempts per allocation before giving up on a contended pool.
const MAX_RESERVE_ATTEMPTS: usize = 32;

pub struct AddressPool {
    store: Arc<dyn LedgerStore>,
    node: Arc<dyn BitcoinNode>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl AddressPool {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        node: Arc<dyn BitcoinNode>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            node,
            clock,
            config,
        }
    }

    /// A receiving address for `wallet`.
    ///
    /// Reuses the wallet's oldest active address (one that never received
    /// anything, when `fresh`); otherwise claims one from the pool.
    pub async fn allocate(&self, wallet: WalletId, fresh: bool) -> Result<Address> {
        self.store
            .wallet(wallet)?
            .ok_or(LedgerError::WalletNotFound(wallet))?;

        let reusable = self
            .store
            .addresses_for_wallet(wallet)?
            .into_iter()
            .find(|a| !fresh || a.received_unconfirmed.is_zero());
        if let Some(addr) = reusable {
            return Ok(addr);
        }

        let mut addr = self.reserve().await?;
        if !self.store.assign_address(addr.id, wallet)? {
            tracing::warn!(address = %addr.address, wallet = %wallet, "address assignment lost race");
            return Err(LedgerError::ConcurrencyConflict(addr.address));
        }
        addr.active = true;
        addr.wallet = Some(wallet);
        tracing::info!(address = %addr.address, wallet = %wallet, "address assigned");
        Ok(addr)
    }

    /// The wallet's long-lived address, reused even after it received funds.
    pub async fn static_address(&self, wallet: WalletId) -> Result<Address> {
        self.allocate(wallet, false).await
    }

    /// Take one address out of the pool, refilling it when empty.
    async fn reserve(&self) -> Result<Address> {
        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let Some(candidate) = self.store.pool_candidates(1)?.into_iter().next() else {
                if self.replenish(self.config.address_pool_size).await? == 0 {
                    // Somebody else refilled between our count and read.
                    tokio::task::yield_now().await;
                }
                continue;
            };
            if self.store.reserve_pool_address(candidate.id)? {
                return Ok(candidate);
            }
            tracing::debug!(address = %candidate.address, "pool reservation lost race");
        }
        Err(LedgerError::ConcurrencyConflict("address pool".into()))
    }

    /// Create node addresses until `target` unreserved ones are pooled.
    /// Returns how many were added.
    pub async fn replenish(&self, target: usize) -> Result<usize> {
        let deficit = target.saturating_sub(self.store.count_pool()?);
        for added in 0..deficit {
            let address = match self.node.new_address(&self.config.address_label).await {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!(added, error = %e, "pool refill interrupted");
                    if added == 0 {
                        return Err(e.into());
                    }
                    return Ok(added);
                }
            };
            let row = Address::pooled(address, &self.config.address_label, self.clock.now());
            if let Err(e) = self.store.insert_address(row) {
                tracing::error!(error = %e, "node returned an address we already hold");
                return Err(e);
            }
        }
        if deficit > 0 {
            tracing::info!(added = deficit, target, "address pool refilled");
        }
        Ok(deficit)
    }

    pub fn pool_size(&self) -> Result<usize> {
        self.store.count_pool()
    }
}

impl std::fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressPool")
            .field("target", &self.config.address_pool_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_node::mock::{MockNode, txid_from_byte};
    use custody_store::MemoryStore;
    use custody_types::{ManualClock, Wallet};
    use rust_decimal::Decimal;

    struct Setup {
        store: Arc<MemoryStore>,
        node: Arc<MockNode>,
        pool: Arc<AddressPool>,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryStore::new());
        let node = Arc::new(MockNode::builder().build());
        let pool = Arc::new(AddressPool::new(
            store.clone(),
            node.clone(),
            Arc::new(ManualClock::default()),
            LedgerConfig::default(),
        ));
        Setup { store, node, pool }
    }

    fn wallet(store: &MemoryStore) -> WalletId {
        let w = Wallet::new("w", chrono::Utc::now());
        store.insert_wallet(w.clone()).unwrap();
        w.id
    }

    #[tokio::test]
    async fn empty_pool_is_refilled_on_demand() {
        let s = setup();
        let w = wallet(&s.store);

        let addr = s.pool.allocate(w, true).await.unwrap();
        assert_eq!(addr.wallet, Some(w));
        assert!(addr.active);
        // refilled to 5, one handed out
        assert_eq!(s.pool.pool_size().unwrap(), 4);
    }

    #[tokio::test]
    async fn fresh_address_is_reused_until_it_receives() {
        let s = setup();
        let w = wallet(&s.store);
        let first = s.pool.allocate(w, true).await.unwrap();
        let again = s.pool.allocate(w, true).await.unwrap();
        assert_eq!(first.id, again.id);

        s.store.set_watermarks(first.id, Decimal::ONE, Decimal::ZERO);
        let next = s.pool.allocate(w, true).await.unwrap();
        assert_ne!(first.id, next.id);

        let stat = s.pool.static_address(w).await.unwrap();
        assert_eq!(stat.id, first.id);
    }

    #[tokio::test]
    async fn concurrent_allocations_get_distinct_addresses() {
        let s = setup();
        s.pool.replenish(5).await.unwrap();
        let wallets: Vec<_> = (0..5).map(|_| wallet(&s.store)).collect();

        let tasks: Vec<_> = wallets
            .iter()
            .map(|w| {
                let pool = Arc::clone(&s.pool);
                let w = *w;
                tokio::spawn(async move { pool.allocate(w, true).await })
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        for t in tasks {
            let addr = t.await.unwrap().unwrap();
            assert!(seen.insert(addr.address));
        }
        for w in wallets {
            assert_eq!(s.store.addresses_for_wallet(w).unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn replenish_only_adds_the_deficit() {
        let s = setup();
        assert_eq!(s.pool.replenish(3).await.unwrap(), 3);
        assert_eq!(s.pool.replenish(5).await.unwrap(), 2);
        assert_eq!(s.pool.replenish(5).await.unwrap(), 0);
        assert_eq!(s.pool.pool_size().unwrap(), 5);
    }

    #[tokio::test]
    async fn node_outage_surfaces_when_pool_is_empty() {
        let s = setup();
        let w = wallet(&s.store);
        s.node.set_available(false);
        let err = s.pool.allocate(w, true).await.unwrap_err();
        assert!(matches!(err, LedgerError::ExternalUnavailable(_)));
    }

    #[tokio::test]
    async fn used_pool_rows_are_never_handed_out() {
        let s = setup();
        let w = wallet(&s.store);
        s.pool.replenish(1).await.unwrap();
        let stale = s.store.pool_candidates(1).unwrap().remove(0);
        // a receipt landed on a pooled address before anyone claimed it
        s.node.receive(&stale.address, txid_from_byte(1), Decimal::ONE, 0);
        s.store.set_watermarks(stale.id, Decimal::ONE, Decimal::ZERO);

        let addr = s.pool.allocate(w, true).await.unwrap();
        assert_ne!(addr.id, stale.id);
    }

    #[tokio::test]
    async fn unknown_wallet_rejected() {
        let s = setup();
        assert!(matches!(
            s.pool.allocate(WalletId::new(), true).await,
            Err(LedgerError::WalletNotFound(_))
        ));
    }
}
