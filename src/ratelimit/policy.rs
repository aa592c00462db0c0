//! Quota lookup per endpoint category and caller tier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category used when a request matches no classification rule or the
/// category has no configured quota.
pub const DEFAULT_CATEGORY: &str = "default";
/// Default requests per window for the `default` category.
pub const DEFAULT_LIMIT: u64 = 100;
/// Default window length in seconds, shared by all categories.
pub const DEFAULT_WINDOW_SECS: u64 = 60;
/// Default quota multiplier for privileged callers.
pub const DEFAULT_PRIVILEGED_MULTIPLIER: f64 = 5.0;

/// Built-in per-category quotas for the git endpoints.
pub const BUILTIN_LIMITS: &[(&str, u64)] = &[
    ("git_status", 60),
    ("git_commit", 10),
    ("git_push", 10),
    ("git_pull", 20),
    ("git_diff", 30),
    ("git_log", 30),
];

/// Quota for one endpoint category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    /// Category name
    pub category: String,
    /// Maximum requests allowed per window
    pub requests_per_window: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

/// Maps endpoint categories and caller privilege to a numeric quota.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitPolicy {
    /// Quota for categories without an entry in `limits`
    default_limit: u64,
    /// Window length shared by all categories
    window_secs: u64,
    /// Multiplier applied to privileged callers' quotas
    privileged_multiplier: f64,
    /// Per-category quotas
    limits: BTreeMap<String, u64>,
}

impl LimitPolicy {
    /// Create a policy with the given defaults and no category overrides.
    pub fn new(default_limit: u64, window_secs: u64, privileged_multiplier: f64) -> Self {
        Self {
            default_limit,
            window_secs,
            privileged_multiplier,
            limits: BTreeMap::new(),
        }
    }

    /// Add or replace the quota for a category.
    ///
    /// Setting the `default` category replaces the fallback quota.
    pub fn with_limit(mut self, category: impl Into<String>, requests_per_window: u64) -> Self {
        let category = category.into();
        if category == DEFAULT_CATEGORY {
            self.default_limit = requests_per_window;
        } else {
            self.limits.insert(category, requests_per_window);
        }
        self
    }

    /// The default policy extended with [`BUILTIN_LIMITS`].
    pub fn builtin() -> Self {
        Self::default().with_builtin_limits()
    }

    /// Add [`BUILTIN_LIMITS`] to this policy.
    pub fn with_builtin_limits(self) -> Self {
        BUILTIN_LIMITS
            .iter()
            .fold(self, |policy, (category, limit)| policy.with_limit(*category, *limit))
    }

    /// Base quota for a category, falling back to the default entry.
    pub fn base_limit(&self, category: &str) -> u64 {
        self.limits
            .get(category)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Effective quota for a category and caller tier.
    ///
    /// Privileged callers get `floor(base * multiplier)`.
    pub fn limit_for(&self, category: &str, is_privileged: bool) -> u64 {
        let base = self.base_limit(category);
        if is_privileged {
            (base as f64 * self.privileged_multiplier).floor() as u64
        } else {
            base
        }
    }

    /// Window length shared by all categories.
    pub fn default_window(&self) -> u64 {
        self.window_secs
    }

    /// Multiplier applied to privileged callers.
    pub fn privileged_multiplier(&self) -> f64 {
        self.privileged_multiplier
    }

    /// Resolved table row for a category.
    pub fn endpoint_limit(&self, category: &str) -> EndpointLimit {
        let category = if self.limits.contains_key(category) {
            category
        } else {
            DEFAULT_CATEGORY
        };
        EndpointLimit {
            category: category.to_string(),
            requests_per_window: self.base_limit(category),
            window_seconds: self.window_secs,
        }
    }

    /// All table rows, `default` first and the rest sorted by name.
    pub fn limits(&self) -> Vec<EndpointLimit> {
        std::iter::once(DEFAULT_CATEGORY)
            .chain(self.limits.keys().map(String::as_str))
            .map(|category| self.endpoint_limit(category))
            .collect()
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_LIMIT,
            DEFAULT_WINDOW_SECS,
            DEFAULT_PRIVILEGED_MULTIPLIER,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_uses_default() {
        let policy = LimitPolicy::new(5, 60, 5.0).with_limit("git_commit", 10);

        assert_eq!(policy.limit_for("git_commit", false), 10);
        assert_eq!(policy.limit_for("no_such_category", false), 5);
        assert_eq!(policy.endpoint_limit("no_such_category").category, "default");
    }

    #[test]
    fn test_privileged_multiplier_truncates() {
        let policy = LimitPolicy::new(5, 60, 5.0);
        assert_eq!(policy.limit_for("default", true), 25);

        let policy = LimitPolicy::new(3, 60, 2.5);
        assert_eq!(policy.limit_for("default", true), 7);
    }

    #[test]
    fn test_default_entry_override() {
        let policy = LimitPolicy::default().with_limit("default", 42);
        assert_eq!(policy.limit_for("anything", false), 42);
        assert_eq!(policy.limits().len(), 1);
    }

    #[test]
    fn test_builtin_table() {
        let policy = LimitPolicy::builtin();

        assert_eq!(policy.limit_for("git_commit", false), 10);
        assert_eq!(policy.limit_for("git_status", false), 60);
        assert_eq!(policy.default_window(), DEFAULT_WINDOW_SECS);

        let rows = policy.limits();
        assert_eq!(rows[0].category, "default");
        assert_eq!(rows.len(), 7);
        assert!(rows.iter().all(|row| row.window_seconds == 60));
    }
}
