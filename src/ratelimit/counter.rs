//! Rate limit counter entries.

/// Longest window a counter can represent.
pub const MAX_WINDOW_SECS: u64 = i64::MAX as u64;

/// Unix timestamp `window_secs` after `now`, saturating at `i64::MAX`.
pub fn expiry_after(now: i64, window_secs: u64) -> i64 {
    now.saturating_add(i64::try_from(window_secs).unwrap_or(i64::MAX))
}

/// A counter tracking requests for one quota bucket.
///
/// The expiry is renewed on every increment, so a bucket only lapses after a
/// quiet period of at least one window with no admitted requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Number of admitted requests since the bucket was created
    pub count: u64,
    /// Unix timestamp (seconds) at which the bucket lapses
    pub expires_at: i64,
}

impl CounterEntry {
    /// Create an empty counter that lapses at `expires_at`.
    pub fn new(expires_at: i64) -> Self {
        Self {
            count: 0,
            expires_at,
        }
    }

    /// Whether the counter has lapsed at `now`.
    ///
    /// The expiry instant itself counts as lapsed.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Increment the counter and push its expiry to `now + window_secs`.
    ///
    /// Returns the post-increment count.
    pub fn increment(&mut self, now: i64, window_secs: u64) -> u64 {
        self.count += 1;
        self.expires_at = expiry_after(now, window_secs);
        self.count
    }
}
