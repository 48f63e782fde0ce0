//! Shared key/value cache with optional TTLs.
//!
//! Backs the advisory job locks and the reconciler's block watermark. The
//! production backend is a memcached/redis-style service; [`MemoryCache`]
//! is the in-process equivalent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use custody_types::{Clock, LedgerError, Result};

/// Key/value operations the ledger relies on.
pub trait KvCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write. `ttl == None` never expires.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns whether it wrote.
    fn add(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Delete only if the current value equals `expected`.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache; expiry is evaluated lazily against the injected clock.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(&self, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
        ttl.map(|ttl| {
            self.clock
                .now()
                .checked_add_signed(ttl)
                .ok_or_else(|| LedgerError::Internal(format!("cache ttl out of range: {ttl}")))
        })
        .transpose()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries().values().filter(|e| e.live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries().len())
            .finish_non_exhaustive()
    }
}

impl KvCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        Ok(self
            .entries()
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = self.expiry(ttl)?;
        self.entries().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn add(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl)?;
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|e| e.live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(e) if e.live(now) && e.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
