//! Configuration management for Quotagate.
//!
//! Rate limiting settings are read from environment-style keys under the
//! `RATE_LIMIT_` prefix. Known keys map onto [`RateLimitSettings`] fields;
//! every other key is a per-category quota named by its suffix, so
//! `RATE_LIMIT_GIT_COMMIT=10` sets the `git_commit` category to 10 requests
//! per window. Malformed values are reported as [`QuotagateError::Config`]
//! and are meant to abort startup.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QuotagateError, Result};
use crate::ratelimit::{
    CategoryRules, LimitPolicy, RedisStoreConfig, DEFAULT_LIMIT, DEFAULT_PRIVILEGED_MULTIPLIER,
    DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS,
};

/// Prefix shared by all rate limiting environment keys.
pub const ENV_PREFIX: &str = "RATE_LIMIT";
/// Prefix for server environment keys such as `QUOTAGATE_LISTEN_ADDR`.
pub const SERVER_ENV_PREFIX: &str = "QUOTAGATE";

/// Main configuration for the Quotagate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotagateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitSettings,
}

impl QuotagateConfig {
    /// Load both sections from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::load(None)?,
            rate_limiting: RateLimitSettings::from_env()?,
        })
    }

    /// Load both sections from an explicit map of environment-style
    /// variables. Each section only sees keys under its own prefix.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = collect_vars(vars);
        Ok(Self {
            server: ServerConfig::load(Some(vars.clone()))?,
            rate_limiting: RateLimitSettings::load(Some(vars))?,
        })
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl ServerConfig {
    fn load(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let server = Config::builder()
            .add_source(Environment::with_prefix(SERVER_ENV_PREFIX).source(vars))
            .build()?
            .try_deserialize()?;
        Ok(server)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; quotas are per instance
    #[default]
    Memory,
    /// Shared Redis server; quotas are global across instances
    Redis,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redis" => Ok(StorageBackend::Redis),
            other => Err(format!("expected `memory` or `redis`, got `{}`", other)),
        }
    }
}

/// What the HTTP layer does when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFailurePolicy {
    /// Reject the request with 503
    #[default]
    Closed,
    /// Forward the request without a decision
    Open,
}

impl FromStr for StorageFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail-closed" | "fail_closed" => Ok(StorageFailurePolicy::Closed),
            "open" | "fail-open" | "fail_open" => Ok(StorageFailurePolicy::Open),
            other => Err(format!("expected `open` or `closed`, got `{}`", other)),
        }
    }
}

/// Immutable snapshot of rate limiting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Master switch; when off every request is forwarded untouched
    pub enabled: bool,
    /// Quota for the `default` category
    pub default_requests: u64,
    /// Window length in seconds shared by all categories
    pub default_window_secs: u64,
    /// Quota multiplier for privileged callers
    pub admin_multiplier: f64,
    /// Path prefixes that bypass rate limiting
    pub excluded_paths: Vec<String>,
    /// Path prefixes where privileged callers get the multiplier
    pub admin_paths: Vec<String>,
    /// Role value that marks a caller as privileged
    pub admin_role: String,
    /// Counter store backend
    pub storage: StorageBackend,
    /// Redis connection URL, used when `storage` is `redis`
    #[serde(skip_serializing)]
    pub redis_url: String,
    /// Prefix for Redis counter keys
    pub key_prefix: String,
    /// Behaviour when the counter store fails
    pub on_storage_error: StorageFailurePolicy,
    /// Optional YAML file with classification rules
    pub rules_file: Option<String>,
    /// Per-category quota overrides
    pub category_limits: BTreeMap<String, u64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let redis = RedisStoreConfig::default();
        Self {
            enabled: true,
            default_requests: DEFAULT_LIMIT,
            default_window_secs: DEFAULT_WINDOW_SECS,
            admin_multiplier: DEFAULT_PRIVILEGED_MULTIPLIER,
            excluded_paths: vec!["/health".to_string(), "/metrics".to_string()],
            admin_paths: vec!["/api/admin".to_string()],
            admin_role: "admin".to_string(),
            storage: StorageBackend::Memory,
            redis_url: redis.url,
            key_prefix: redis.key_prefix,
            on_storage_error: StorageFailurePolicy::Closed,
            rules_file: None,
            category_limits: BTreeMap::new(),
        }
    }
}

impl RateLimitSettings {
    /// Load settings from `RATE_LIMIT_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load settings from an explicit map of environment-style variables.
    ///
    /// Keys are full variable names such as `RATE_LIMIT_ENABLED`; keys
    /// without the prefix are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::load(Some(collect_vars(vars)))
    }

    fn load(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let raw: HashMap<String, String> = Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).source(vars))
            .build()?
            .try_deserialize()?;

        debug!(keys = raw.len(), "Read rate limit configuration keys");
        Self::from_raw(raw)
    }

    /// Build settings from lowercased keys with the prefix already removed.
    fn from_raw(mut raw: HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let enabled = match raw.remove("enabled") {
            Some(value) => parse_bool("enabled", &value)?,
            None => defaults.enabled,
        };
        let default_requests = take_parsed(&mut raw, "default_requests")?
            .unwrap_or(defaults.default_requests);
        let default_window_secs = take_parsed(&mut raw, "default_window")?
            .unwrap_or(defaults.default_window_secs);
        let admin_multiplier = take_parsed(&mut raw, "admin_multiplier")?
            .unwrap_or(defaults.admin_multiplier);
        let excluded_paths = raw
            .remove("excluded_paths")
            .map(|value| split_list(&value))
            .unwrap_or(defaults.excluded_paths);
        let admin_paths = raw
            .remove("admin_paths")
            .map(|value| split_list(&value))
            .unwrap_or(defaults.admin_paths);
        let admin_role = raw
            .remove("admin_role")
            .map(|value| value.trim().to_string())
            .unwrap_or(defaults.admin_role);
        let storage = take_parsed(&mut raw, "storage")?.unwrap_or(defaults.storage);
        let redis_url = raw.remove("redis_url").unwrap_or(defaults.redis_url);
        let key_prefix = raw.remove("key_prefix").unwrap_or(defaults.key_prefix);
        let on_storage_error =
            take_parsed(&mut raw, "on_storage_error")?.unwrap_or(defaults.on_storage_error);
        let rules_file = raw
            .remove("rules_file")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        // Whatever is left names a category.
        let category_limits = raw
            .into_iter()
            .map(|(category, value)| {
                let limit = parse_value::<u64>(&category, &value)?;
                Ok((category, limit))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let settings = Self {
            enabled,
            default_requests,
            default_window_secs,
            admin_multiplier,
            excluded_paths,
            admin_paths,
            admin_role,
            storage,
            redis_url,
            key_prefix,
            on_storage_error,
            rules_file,
            category_limits,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.default_window_secs == 0 {
            return Err(config_error("default_window", "window must be at least one second"));
        }
        if self.default_window_secs > MAX_WINDOW_SECS {
            return Err(config_error(
                "default_window",
                format!("window must not exceed {} seconds", MAX_WINDOW_SECS),
            ));
        }
        if !self.admin_multiplier.is_finite() || self.admin_multiplier < 0.0 {
            return Err(config_error(
                "admin_multiplier",
                "multiplier must be a finite, non-negative number",
            ));
        }
        Ok(())
    }

    /// Build the limit policy: built-in table, then configured overrides.
    pub fn policy(&self) -> LimitPolicy {
        let policy = LimitPolicy::new(
            self.default_requests,
            self.default_window_secs,
            self.admin_multiplier,
        )
        .with_builtin_limits();

        self.category_limits
            .iter()
            .fold(policy, |policy, (category, limit)| {
                policy.with_limit(category.as_str(), *limit)
            })
    }

    /// Load classification rules from `rules_file`, or the built-in rules.
    pub fn rules(&self) -> Result<CategoryRules> {
        match &self.rules_file {
            Some(path) => CategoryRules::from_file(path),
            None => Ok(CategoryRules::builtin()),
        }
    }

    /// Redis connection settings.
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
        }
    }
}

fn collect_vars<I, K, V>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    vars.into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn env_key(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.to_ascii_uppercase())
}

fn config_error(key: &str, message: impl Display) -> QuotagateError {
    QuotagateError::Config(format!("{}: {}", env_key(key), message))
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| config_error(key, format!("invalid value `{}`: {}", value, e)))
}

fn take_parsed<T>(raw: &mut HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.remove(key)
        .map(|value| parse_value(key, &value))
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(config_error(key, format!("invalid boolean `{}`", other))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(vars: &[(&str, &str)]) -> Result<RateLimitSettings> {
        RateLimitSettings::from_vars(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings, RateLimitSettings::default());
        assert!(settings.enabled);
        assert_eq!(settings.default_requests, 100);
        assert_eq!(settings.default_window_secs, 60);
        assert_eq!(settings.admin_multiplier, 5.0);
    }

    #[test]
    fn test_known_keys() {
        let settings = load(&[
            ("RATE_LIMIT_ENABLED", "false"),
            ("RATE_LIMIT_DEFAULT_REQUESTS", "5"),
            ("RATE_LIMIT_DEFAULT_WINDOW", "30"),
            ("RATE_LIMIT_ADMIN_MULTIPLIER", "2.5"),
            ("RATE_LIMIT_EXCLUDED_PATHS", "/health, /docs ,,/static"),
            ("RATE_LIMIT_STORAGE", "redis"),
            ("RATE_LIMIT_ON_STORAGE_ERROR", "open"),
        ])
        .unwrap();

        assert!(!settings.enabled);
        assert_eq!(settings.default_requests, 5);
        assert_eq!(settings.default_window_secs, 30);
        assert_eq!(settings.admin_multiplier, 2.5);
        assert_eq!(settings.excluded_paths, vec!["/health", "/docs", "/static"]);
        assert_eq!(settings.storage, StorageBackend::Redis);
        assert_eq!(settings.on_storage_error, StorageFailurePolicy::Open);
    }

    #[test]
    fn test_category_overrides() {
        let settings = load(&[
            ("RATE_LIMIT_DEFAULT_REQUESTS", "5"),
            ("RATE_LIMIT_GIT_COMMIT", "3"),
            ("RATE_LIMIT_REPORTS", "7"),
        ])
        .unwrap();

        assert_eq!(settings.category_limits.get("git_commit"), Some(&3));

        let policy = settings.policy();
        assert_eq!(policy.limit_for("default", false), 5);
        assert_eq!(policy.limit_for("git_commit", false), 3);
        assert_eq!(policy.limit_for("git_push", false), 10);
        assert_eq!(policy.limit_for("reports", false), 7);
    }

    #[test]
    fn test_unrelated_variables_ignored() {
        let settings = load(&[("PATH", "/usr/bin"), ("RATELIMIT_X", "oops")]).unwrap();
        assert!(settings.category_limits.is_empty());
    }

    #[test]
    fn test_malformed_numbers_are_fatal() {
        for (key, value) in [
            ("RATE_LIMIT_DEFAULT_REQUESTS", "lots"),
            ("RATE_LIMIT_DEFAULT_WINDOW", "-1"),
            ("RATE_LIMIT_ADMIN_MULTIPLIER", "five"),
            ("RATE_LIMIT_GIT_COMMIT", "ten"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            match err {
                QuotagateError::Config(message) => assert!(message.contains(key), "{}", message),
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("RATE_LIMIT_DEFAULT_WINDOW", "0")]).is_err());
        assert!(load(&[("RATE_LIMIT_DEFAULT_WINDOW", "18446744073709551615")]).is_err());
        assert!(load(&[("RATE_LIMIT_ADMIN_MULTIPLIER", "-2")]).is_err());
        assert!(load(&[("RATE_LIMIT_ADMIN_MULTIPLIER", "NaN")]).is_err());
        assert!(load(&[("RATE_LIMIT_ENABLED", "maybe")]).is_err());
        assert!(load(&[("RATE_LIMIT_STORAGE", "postgres")]).is_err());
        assert!(load(&[("RATE_LIMIT_ON_STORAGE_ERROR", "sideways")]).is_err());
    }

    #[test]
    fn test_default_rules_without_file() {
        let settings = RateLimitSettings::default();
        let rules = settings.rules().unwrap();
        assert_eq!(rules.classify("/git/commit"), "git_commit");
    }

    #[test]
    fn test_redis_url_not_serialized() {
        let settings = RateLimitSettings {
            redis_url: "redis://:secret@cache/".to_string(),
            ..RateLimitSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_oversized_window_is_fatal() {
        let err = load(&[
            ("RATE_LIMIT_DEFAULT_REQUESTS", "5"),
            ("RATE_LIMIT_DEFAULT_WINDOW", "18446744073709551615"),
        ])
        .unwrap_err();
        match err {
            QuotagateError::Config(message) => {
                assert!(message.contains("RATE_LIMIT_DEFAULT_WINDOW"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let largest = MAX_WINDOW_SECS.to_string();
        let settings = load(&[("RATE_LIMIT_DEFAULT_WINDOW", largest.as_str())]).unwrap();
        assert_eq!(settings.default_window_secs, MAX_WINDOW_SECS);
    }

    #[test]
    fn test_rules_loaded_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rules:\n  - pattern: /reports/\n    category: reports\n  - pattern: /git/push\n    category: git_push"
        )
        .unwrap();

        let settings = RateLimitSettings {
            rules_file: Some(file.path().display().to_string()),
            ..RateLimitSettings::default()
        };
        let rules = settings.rules().unwrap();

        assert_eq!(rules.rules.len(), 2);
        assert_eq!(rules.classify("/api/reports/7"), "reports");
        assert_eq!(rules.classify("/api/repos/1/git/push"), "git_push");
        assert_eq!(rules.classify("/api/repos/1/git/status"), "default");
    }

    #[test]
    fn test_missing_rules_file_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = RateLimitSettings {
            rules_file: Some(dir.path().join("absent.yaml").display().to_string()),
            ..RateLimitSettings::default()
        };
        assert!(matches!(settings.rules(), Err(QuotagateError::Io(_))));
    }

    #[test]
    fn test_default_server_addr() {
        let config = QuotagateConfig::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.rate_limiting, RateLimitSettings::default());
    }

    #[test]
    fn test_listen_addr_from_vars() {
        let config = QuotagateConfig::from_vars([
            ("QUOTAGATE_LISTEN_ADDR", "0.0.0.0:9000"),
            ("RATE_LIMIT_DEFAULT_REQUESTS", "7"),
        ])
        .unwrap();

        assert_eq!(config.server.listen_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));
        assert_eq!(config.rate_limiting.default_requests, 7);
        assert!(config.rate_limiting.category_limits.is_empty());
    }

    #[test]
    fn test_bad_listen_addr_is_fatal() {
        let err = QuotagateConfig::from_vars([("QUOTAGATE_LISTEN_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, QuotagateError::Config(_)));
    }
}
