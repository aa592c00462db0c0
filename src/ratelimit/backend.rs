//! Counter store trait for abstracting in-process and networked storage.

use async_trait::async_trait;

use crate::error::StoreError;

use super::key::CounterKey;

/// Result type for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquire {
    /// Whether the request was counted against the quota
    pub admitted: bool,
    /// Count for the bucket after the operation
    pub count: u64,
    /// When the bucket lapses, if it exists
    pub expires_at: Option<i64>,
}

/// Trait for counter store implementations.
///
/// This trait abstracts over both the in-process `MemoryCounterStore` and
/// the networked `RedisCounterStore` so the rate limiter can work with either.
/// Every operation is atomic with respect to concurrent callers on the same
/// key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for the key, or `None` if no live entry exists.
    async fn get(&self, key: &CounterKey) -> StoreResult<Option<u64>>;

    /// Add one to the key, renew its expiry to `now + window_secs`, and
    /// return the post-increment count.
    async fn increment(&self, key: &CounterKey, window_secs: u64) -> StoreResult<u64>;

    /// Remove the key. Deleting an absent key is not an error.
    async fn delete(&self, key: &CounterKey) -> StoreResult<()>;

    /// Unix timestamp at which the key lapses, or `None` if it does not exist.
    async fn get_expiry(&self, key: &CounterKey) -> StoreResult<Option<i64>>;

    /// Count one request only if the key is below `limit`.
    ///
    /// Reading the count, comparing it to `limit`, and incrementing happen as
    /// one atomic step. A refused request neither increments the count nor
    /// renews the expiry.
    async fn try_acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        window_secs: u64,
    ) -> StoreResult<Acquire>;

    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;
}
