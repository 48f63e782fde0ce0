//! Runtime switch for withdrawals.
//!
//! Operators turn withdrawals off during node maintenance or incident
//! response. Requests are rejected up front; already queued outgoing
//! transactions are left to the batcher.

use std::sync::atomic::{AtomicBool, Ordering};

use custody_types::{LedgerError, Result};

#[derive(Debug)]
pub struct OutgoingSwitch {
    enabled: AtomicBool,
}

impl OutgoingSwitch {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::warn!(enabled, "outgoing switch toggled");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Guard a withdrawal request. Returns [`LedgerError::OutgoingDisabled`]
    /// while switched off.
    pub fn check(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(LedgerError::OutgoingDisabled)
        }
    }
}

impl Default for OutgoingSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}
