//! Rate limiting logic and state management.

mod backend;
mod counter;
mod key;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod rules;

pub use backend::{Acquire, CounterStore, StoreResult};
pub use counter::{CounterEntry, MAX_WINDOW_SECS};
pub use key::CounterKey;
pub use limiter::{Decision, RateLimiter};
pub use memory::MemoryCounterStore;
pub use policy::{
    EndpointLimit, LimitPolicy, BUILTIN_LIMITS, DEFAULT_CATEGORY, DEFAULT_LIMIT,
    DEFAULT_PRIVILEGED_MULTIPLIER, DEFAULT_WINDOW_SECS,
};
pub use redis_store::{RedisCounterStore, RedisStoreConfig};
pub use rules::{CategoryRule, CategoryRules};
