//! Notification hooks invoked after a committed state change.
//!
//! Observers run synchronously on the mutating thread, after the store
//! write has succeeded. They must not call back into the ledger.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::{OutgoingTransaction, WalletId};

/// Receives balance change notifications.
pub trait BalanceObserver: Send + Sync {
    /// Spendable-or-pending balance of `wallet` moved by `delta`.
    fn on_balance_changed(&self, _wallet: WalletId, _delta: Decimal) {}

    /// Confirmed balance of `wallet` moved by `delta`.
    fn on_balance_confirmed_changed(&self, _wallet: WalletId, _delta: Decimal) {}
}

/// Receives every newly queued withdrawal.
pub trait OutgoingListener: Send + Sync {
    fn on_outgoing_queued(&self, outgoing: &OutgoingTransaction);
}

/// Registered observers, notified in registration order.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Vec<Arc<dyn BalanceObserver>>,
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn BalanceObserver>) {
        self.inner.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn balance_changed(&self, wallet: WalletId, delta: Decimal) {
        for obs in &self.inner {
            obs.on_balance_changed(wallet, delta);
        }
    }

    pub fn balance_confirmed_changed(&self, wallet: WalletId, delta: Decimal) {
        for obs in &self.inner {
            obs.on_balance_confirmed_changed(wallet, delta);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.inner.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(WalletId, Decimal, bool)>>,
    }

    impl BalanceObserver for Recorder {
        fn on_balance_changed(&self, wallet: WalletId, delta: Decimal) {
            self.seen.lock().unwrap().push((wallet, delta, false));
        }

        fn on_balance_confirmed_changed(&self, wallet: WalletId, delta: Decimal) {
            self.seen.lock().unwrap().push((wallet, delta, true));
        }
    }

    struct Silent;
    impl BalanceObserver for Silent {}

    #[test]
    fn observers_fan_out() {
        let rec = Arc::new(Recorder::default());
        let mut obs = Observers::new();
        obs.register(rec.clone());
        obs.register(Arc::new(Silent));
        assert_eq!(obs.len(), 2);

        let w = WalletId::new();
        obs.balance_changed(w, Decimal::ONE);
        obs.balance_confirmed_changed(w, Decimal::NEGATIVE_ONE);

        let seen = rec.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(w, Decimal::ONE, false), (w, Decimal::NEGATIVE_ONE, true)]
        );
    }
}
