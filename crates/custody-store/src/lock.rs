//! Advisory, time-boxed mutex over the shared cache.
//!
//! Acquisition is a set-if-absent of `lock:<name>` carrying a random token
//! and a TTL. The holder releases with compare-and-delete on its own token,
//! so a holder whose lock already expired and was re-acquired elsewhere
//! never releases the new owner's lock. A crashed holder is recovered by
//! the TTL.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::time::{Instant, sleep};

use custody_types::Result;

use crate::cache::KvCache;

const KEY_PREFIX: &str = "lock:";
const INITIAL_BACKOFF: StdDuration = StdDuration::from_millis(10);
const MAX_BACKOFF: StdDuration = StdDuration::from_millis(200);

/// Factory for named advisory locks sharing one cache and TTL.
#[derive(Clone)]
pub struct DistributedMutex {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl DistributedMutex {
    #[must_use]
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquire without waiting. `None` when someone else holds it.
    pub fn try_lock(&self, name: &str) -> Result<Option<LockGuard>> {
        let key = format!("{KEY_PREFIX}{name}");
        let token = hex::encode(rand::random::<[u8; 16]>());
        if self.cache.add(&key, &token, Some(self.ttl))? {
            tracing::debug!(lock = name, "acquired");
            Ok(Some(LockGuard {
                cache: Arc::clone(&self.cache),
                key,
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Poll with backoff until acquired or `wait` elapses.
    pub async fn lock(&self, name: &str, wait: StdDuration) -> Result<Option<LockGuard>> {
        let deadline = Instant::now() + wait;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if let Some(guard) = self.try_lock(name)? {
                return Ok(Some(guard));
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock = name, "gave up waiting");
                return Ok(None);
            }
            sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Whether the lock is currently held by anyone.
    pub fn is_locked(&self, name: &str) -> Result<bool> {
        Ok(self.cache.get(&format!("{KEY_PREFIX}{name}"))?.is_some())
    }
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Held lock; released on drop.
pub struct LockGuard {
    cache: Arc<dyn KvCache>,
    key: String,
    token: String,
}

impl LockGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.cache.compare_and_delete(&self.key, &self.token) {
            Ok(true) => tracing::debug!(lock = %self.key, "released"),
            Ok(false) => tracing::warn!(lock = %self.key, "expired before release"),
            Err(e) => tracing::warn!(lock = %self.key, error = %e, "release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use custody_types::ManualClock;

    fn mutex() -> (Arc<ManualClock>, Arc<MemoryCache>, DistributedMutex) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let mutex = DistributedMutex::new(cache.clone(), Duration::seconds(10));
        (clock, cache, mutex)
    }

    #[test]
    fn second_try_lock_fails_until_release() {
        let (_, _, mutex) = mutex();
        let guard = mutex.try_lock("job").unwrap().unwrap();
        assert!(mutex.try_lock("job").unwrap().is_none());
        assert!(mutex.is_locked("job").unwrap());
        drop(guard);
        assert!(!mutex.is_locked("job").unwrap());
        assert!(mutex.try_lock("job").unwrap().is_some());
    }

    #[test]
    fn locks_are_independent_by_name() {
        let (_, _, mutex) = mutex();
        let _a = mutex.try_lock("a").unwrap().unwrap();
        assert!(mutex.try_lock("b").unwrap().is_some());
    }

    #[test]
    fn stale_holder_does_not_release_new_owner() {
        let (clock, _, mutex) = mutex();
        let stale = mutex.try_lock("job").unwrap().unwrap();
        clock.advance(Duration::seconds(10));

        let fresh = mutex.try_lock("job").unwrap().unwrap();
        drop(stale);
        assert!(mutex.is_locked("job").unwrap());
        drop(fresh);
        assert!(!mutex.is_locked("job").unwrap());
    }

    #[tokio::test]
    async fn blocking_lock_times_out() {
        let (_, _, mutex) = mutex();
        let _held = mutex.try_lock("job").unwrap().unwrap();
        let got = mutex.lock("job", StdDuration::from_millis(30)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn blocking_lock_acquires_after_release() {
        let (_, _, mutex) = mutex();
        let held = mutex.try_lock("job").unwrap().unwrap();
        let waiter = {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.lock("job", StdDuration::from_secs(2)).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        drop(held);
        let got = waiter.await.unwrap().unwrap();
        assert!(got.is_some());
    }
}
