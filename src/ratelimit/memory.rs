//! In-process counter store.
//!
//! All counters live in one map behind one mutex. Each operation, including
//! the lazy expiry check, runs as a single critical section, so the store is
//! only correct within a single process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

use super::backend::{Acquire, CounterStore, StoreResult};
use super::counter::CounterEntry;
use super::key::CounterKey;

/// Counter store backed by a process-local hash map.
#[derive(Debug)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<CounterKey, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Look up a live entry, dropping it first if it has lapsed.
    fn live_entry<'a>(
        counters: &'a mut HashMap<CounterKey, CounterEntry>,
        key: &CounterKey,
        now: i64,
    ) -> Option<&'a mut CounterEntry> {
        if counters.get(key).is_some_and(|entry| entry.is_expired(now)) {
            trace!(key = %key, "Dropping lapsed counter");
            counters.remove(key);
        }
        counters.get_mut(key)
    }

    /// Create-or-reuse and increment while the caller holds the lock.
    fn increment_locked(
        counters: &mut HashMap<CounterKey, CounterEntry>,
        key: &CounterKey,
        now: i64,
        window_secs: u64,
    ) -> CounterEntry {
        if Self::live_entry(counters, key, now).is_none() {
            debug!(key = %key, window_secs, "Creating new rate limit counter");
        }
        let entry = counters
            .entry(key.clone())
            .or_insert_with(|| CounterEntry::new(now));
        entry.increment(now, window_secs);
        *entry
    }

    /// Remove every lapsed entry.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, entry| !entry.is_expired(now));
        before - counters.len()
    }

    /// Number of entries currently held, including lapsed ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }

    /// Periodically purge lapsed entries on the current Tokio runtime.
    ///
    /// Lazy expiry only reclaims keys that are read again; the sweeper bounds
    /// memory for callers that never come back.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged lapsed rate limit counters");
                }
            }
        })
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &CounterKey) -> StoreResult<Option<u64>> {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        Ok(Self::live_entry(&mut counters, key, now).map(|entry| entry.count))
    }

    async fn increment(&self, key: &CounterKey, window_secs: u64) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        Ok(Self::increment_locked(&mut counters, key, now, window_secs).count)
    }

    async fn delete(&self, key: &CounterKey) -> StoreResult<()> {
        self.counters.lock().remove(key);
        Ok(())
    }

    async fn get_expiry(&self, key: &CounterKey) -> StoreResult<Option<i64>> {
        let now = self.clock.now();
        let mut counters = self.counters.lock();
        Ok(Self::live_entry(&mut counters, key, now).map(|entry| entry.expires_at))
    }

    async fn try_acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        window_secs: u64,
    ) -> StoreResult<Acquire> {
        let now = self.clock.now();
        let mut counters = self.counters.lock();

        let current = Self::live_entry(&mut counters, key, now).map(|entry| *entry);
        let count = current.map_or(0, |entry| entry.count);

        if count < limit {
            let entry = Self::increment_locked(&mut counters, key, now, window_secs);
            Ok(Acquire {
                admitted: true,
                count: entry.count,
                expires_at: Some(entry.expires_at),
            })
        } else {
            Ok(Acquire {
                admitted: false,
                count,
                expires_at: current.map(|entry| entry.expires_at),
            })
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
