//! Asynchronous balance repair.
//!
//! A best-effort cached-balance update that loses its fence does not block
//! the caller; the wallet is queued here and recomputed from rows later.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use custody_types::WalletId;

use crate::ledger::Ledger;

/// Create a connected queue/receiver pair.
#[must_use]
pub fn repair_channel() -> (RepairQueue, RepairReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RepairQueue { tx }, RepairReceiver { rx })
}

/// Sending half, held by the ledger.
#[derive(Debug, Clone)]
pub struct RepairQueue {
    tx: mpsc::UnboundedSender<WalletId>,
}

impl RepairQueue {
    /// Queue `wallet` for recomputation. Returns `false` once the worker
    /// has shut down.
    pub fn schedule(&self, wallet: WalletId) -> bool {
        match self.tx.send(wallet) {
            Ok(()) => {
                tracing::debug!(wallet = %wallet, "balance repair scheduled");
                true
            }
            Err(_) => {
                tracing::warn!(wallet = %wallet, "repair worker gone, balance left stale");
                false
            }
        }
    }
}

/// Receiving half, consumed by the repair worker.
#[derive(Debug)]
pub struct RepairReceiver {
    rx: mpsc::UnboundedReceiver<WalletId>,
}

impl RepairReceiver {
    /// Repair wallets as they are queued. Stops when `shutdown` flips to
    /// true or its sender is dropped. The ledger holds a queue handle, so
    /// the channel alone never closes while `ledger` is alive.
    pub async fn run(mut self, ledger: Arc<Ledger>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = self.rx.recv() => {
                    let Some(wallet) = next else { break };
                    if let Err(e) = ledger.repair_balance(wallet) {
                        tracing::error!(wallet = %wallet, error = %e, "balance repair failed");
                    }
                }
            }
        }
        tracing::info!("repair worker stopped");
    }

    /// Repair everything queued so far, each wallet once. Returns how many
    /// wallets were repaired successfully.
    pub fn drain(&mut self, ledger: &Ledger) -> usize {
        let mut pending = BTreeSet::new();
        while let Ok(wallet) = self.rx.try_recv() {
            pending.insert(wallet);
        }
        pending
            .into_iter()
            .filter(|wallet| match ledger.repair_balance(*wallet) {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(wallet = %wallet, error = %e, "balance repair failed");
                    false
                }
            })
            .count()
    }
}
