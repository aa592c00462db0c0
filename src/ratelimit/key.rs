//! Counter key generation and handling.

/// A key that uniquely identifies one quota bucket.
///
/// The key is composed of the caller's subject key (`user:<id>` or
/// `ip:<address>`) and the endpoint category the request was classified into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The caller this bucket belongs to
    pub subject: String,
    /// The endpoint category being limited
    pub category: String,
}

impl CounterKey {
    /// Create a new counter key from a subject and category.
    pub fn new(subject: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            category: category.into(),
        }
    }

    /// Convert the counter key to a string representation.
    ///
    /// This is the form used for logging and as the suffix of networked
    /// store keys.
    pub fn to_string_key(&self) -> String {
        format!("{}|{}", self.subject, self.category)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_counter_key_creation() {
        let key = CounterKey::new("ip:10.0.0.1", "default");

        assert_eq!(key.subject, "ip:10.0.0.1");
        assert_eq!(key.category, "default");
    }

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new("user:42", "git_commit");
        assert_eq!(key.to_string_key(), "user:42|git_commit");
        assert_eq!(key.to_string(), "user:42|git_commit");
    }

    #[test]
    fn test_counter_key_distinguishes_categories() {
        let mut keys = HashSet::new();
        keys.insert(CounterKey::new("user:42", "default"));
        keys.insert(CounterKey::new("user:42", "git_commit"));
        keys.insert(CounterKey::new("user:42", "default"));

        assert_eq!(keys.len(), 2);
    }
}
