//! System-wide constants for the custodial ledger.

/// Decimal places kept for every amount (satoshi granularity).
pub const BTC_PRECISION: u32 = 8;

/// Confirmations required before a receipt counts toward spendable balance.
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 3;

/// Unreserved addresses kept in the pool.
pub const DEFAULT_ADDRESS_POOL_SIZE: usize = 5;

/// Delay between a withdrawal request and its earliest settlement, in seconds.
pub const DEFAULT_OUTGOING_DELAY_SECS: u64 = 5;

/// Maximum withdrawals paid out by one on-chain transaction.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 15;

/// Pending withdrawals above this count trigger a batch before any expiry.
pub const DEFAULT_BATCH_BACKLOG_THRESHOLD: usize = 6;

/// TTL of cached `total_received` node answers, in seconds.
pub const DEFAULT_RECEIVED_CACHE_TTL_SECS: u64 = 5;

/// TTL of background job locks, in seconds.
pub const DEFAULT_JOB_LOCK_TTL_SECS: u64 = 10;

/// Blocks scanned back from the tip on the first reconciliation poll.
pub const DEFAULT_INITIAL_SCAN_DEPTH: u64 = 100;

/// Fence retries allowed when repairing a cached balance.
pub const DEFAULT_REPAIR_ATTEMPTS: usize = 3;

/// Label of the wallet that pays network fees.
pub const DEFAULT_FEE_WALLET_LABEL: &str = "network-fees";

/// Label given to addresses created for the pool.
pub const DEFAULT_ADDRESS_LABEL: &str = "pool";

// ---------------------------------------------------------------------------
// Lock and cache keys
// ---------------------------------------------------------------------------

/// Lock held by the deposit reconciliation poll.
pub const LOCK_QUERY_TRANSACTIONS: &str = "query_transactions";

/// Lock serializing confirmed-deposit application against the node.
pub const LOCK_QUERY_NODE: &str = "query_node";

/// Lock held by the outgoing batch processor.
pub const LOCK_PROCESS_OUTGOING: &str = "process_outgoing";

/// Cache key of the last block height scanned by the reconciler.
pub const CACHE_QUERIED_BLOCK_INDEX: &str = "queried_block_index";
