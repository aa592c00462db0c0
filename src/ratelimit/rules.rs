//! Endpoint classification rules.
//!
//! This module maps a request path to the endpoint category used for quota
//! lookup. Rules are an ordered list of substring patterns; the first rule
//! whose pattern occurs in the path wins, and unmatched paths fall into the
//! `default` category.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::policy::DEFAULT_CATEGORY;
use crate::error::{QuotagateError, Result};

/// A single classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Substring searched for in the request path
    pub pattern: String,
    /// Category assigned on match
    pub category: String,
}

impl CategoryRule {
    /// Create a new rule.
    pub fn new(pattern: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            category: category.into(),
        }
    }
}

/// Ordered set of classification rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRules {
    /// Rules in match order
    #[serde(default)]
    pub rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// Create an empty rule set. Every path classifies as `default`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules for the git endpoints.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                CategoryRule::new("/git/status", "git_status"),
                CategoryRule::new("/git/commit", "git_commit"),
                CategoryRule::new("/git/push", "git_push"),
                CategoryRule::new("/git/pull", "git_pull"),
                CategoryRule::new("/git/diff", "git_diff"),
                CategoryRule::new("/git/log", "git_log"),
            ],
        }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, pattern: impl Into<String>, category: impl Into<String>) -> Self {
        self.rules.push(CategoryRule::new(pattern, category));
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading endpoint classification rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    ///
    /// Accepts either a bare list of rules or a map with a `rules` key.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<CategoryRule>>(yaml) {
            return Self { rules }.validated();
        }

        let parsed: CategoryRules = serde_yaml::from_str(yaml)?;
        parsed.validated()
    }

    fn validated(self) -> Result<Self> {
        if let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_empty() || rule.category.is_empty())
        {
            return Err(QuotagateError::Config(format!(
                "classification rule must have a non-empty pattern and category: {:?}",
                rule
            )));
        }
        Ok(self)
    }

    /// Classify a request path into an endpoint category.
    pub fn classify<'a>(&'a self, path: &str) -> &'a str {
        self.rules
            .iter()
            .find(|rule| path.contains(rule.pattern.as_str()))
            .map(|rule| rule.category.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classification() {
        let rules = CategoryRules::builtin();

        assert_eq!(rules.classify("/api/repos/7/git/status"), "git_status");
        assert_eq!(rules.classify("/api/repos/7/git/commit"), "git_commit");
        assert_eq!(rules.classify("/api/vehicles"), "default");
    }

    #[test]
    fn test_first_match_wins() {
        let rules = CategoryRules::new()
            .with_rule("/git/", "git_any")
            .with_rule("/git/commit", "git_commit");

        assert_eq!(rules.classify("/git/commit"), "git_any");
    }

    #[test]
    fn test_empty_rules_classify_default() {
        assert_eq!(CategoryRules::new().classify("/git/status"), "default");
    }

    #[test]
    fn test_parse_rule_list() {
        let yaml = r#"
- pattern: /reports/export
  category: export
- pattern: /auth/login
  category: login
"#;
        let rules = CategoryRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(rules.classify("/api/auth/login"), "login");
    }

    #[test]
    fn test_parse_rules_map() {
        let yaml = r#"
rules:
  - pattern: /upload
    category: upload
"#;
        let rules = CategoryRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.classify("/files/upload"), "upload");
    }

    #[test]
    fn test_reject_empty_pattern() {
        let yaml = r#"
- pattern: ""
  category: everything
"#;
        assert!(matches!(
            CategoryRules::from_yaml(yaml),
            Err(QuotagateError::Config(_))
        ));
    }

    #[test]
    fn test_reject_malformed_yaml() {
        assert!(CategoryRules::from_yaml("rules: 12").is_err());
    }
}
