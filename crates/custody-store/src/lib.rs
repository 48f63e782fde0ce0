//! # custody-store
//!
//! State the ledger shares between workers.
//!
//! - [`LedgerStore`]: the persistence boundary. Every conditional write
//!   (fenced balance update, pool reservation, watermark advance, deposit
//!   confirmation, batch claim) is a single store call that reports whether
//!   it matched.
//! - [`MemoryStore`]: mutex-guarded in-process implementation.
//! - [`KvCache`] / [`MemoryCache`]: TTL key/value cache.
//! - [`DistributedMutex`]: advisory job lock built on [`KvCache::add`].

pub mod cache;
pub mod lock;
pub mod memory;
pub mod store;

pub use cache::{KvCache, MemoryCache};
pub use lock::{DistributedMutex, LockGuard};
pub use memory::MemoryStore;
pub use store::{LedgerStore, MergeSummary};
