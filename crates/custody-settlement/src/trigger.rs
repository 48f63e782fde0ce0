//! Wakes the batcher when a withdrawal is queued.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use custody_types::{OutgoingListener, OutgoingTransaction};

/// Create a connected trigger/receiver pair. Register the trigger on the
/// ledger with `Ledger::with_outgoing_listener` and hand the receiver to
/// `OutgoingBatcher::run`.
#[must_use]
pub fn batch_trigger() -> (BatchTrigger, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BatchTrigger { tx }, TriggerReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct BatchTrigger {
    tx: mpsc::UnboundedSender<DateTime<Utc>>,
}

impl OutgoingListener for BatchTrigger {
    fn on_outgoing_queued(&self, outgoing: &OutgoingTransaction) {
        if self.tx.send(outgoing.expires_at).is_err() {
            tracing::debug!(outgoing = %outgoing.id, "batcher not running, wake-up dropped");
        }
    }
}

/// Expiry times of newly queued withdrawals.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::UnboundedReceiver<DateTime<Utc>>,
}

impl TriggerReceiver {
    /// Next queued expiry. `None` once every trigger is dropped.
    pub async fn recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.recv().await
    }

    /// Expiry already waiting, if any.
    pub fn try_recv(&mut self) -> Option<DateTime<Utc>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn queued_withdrawal_wakes_receiver() {
        let (trigger, mut rx) = batch_trigger();
        let now = Utc::now();
        let out = OutgoingTransaction::new(
            "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
            Decimal::ONE,
            now,
            now + chrono::Duration::seconds(5),
        );
        trigger.on_outgoing_queued(&out);
        assert_eq!(rx.recv().await, Some(out.expires_at));
        assert_eq!(rx.try_recv(), None);

        drop(trigger);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (trigger, rx) = batch_trigger();
        drop(rx);
        let now = Utc::now();
        trigger.on_outgoing_queued(&OutgoingTransaction::new("x", Decimal::ONE, now, now));
    }
}
