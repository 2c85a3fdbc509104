//! Engine configuration.

use serde::Deserialize;

/// Default number of keys bound per relation follow-up query.
///
/// Stays below SQLite's default limit of 999 bound parameters.
pub const DEFAULT_RELATION_BATCH_SIZE: usize = 500;

/// Configuration for a [`Database`](super::Database).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum rows a root query may return. None means unlimited.
    pub max_rows: Option<usize>,

    /// Keys per relation follow-up query.
    pub relation_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_rows: None,
            relation_batch_size: DEFAULT_RELATION_BATCH_SIZE,
        }
    }
}

impl DatabaseConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail queries returning more than `max` rows.
    pub fn with_max_rows(mut self, max: usize) -> Self {
        self.max_rows = Some(max);
        self
    }

    /// Set the relation follow-up batch size. Zero is treated as one.
    pub fn with_relation_batch_size(mut self, size: usize) -> Self {
        self.relation_batch_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::new()
            .with_max_rows(100)
            .with_relation_batch_size(0);
        assert_eq!(config.max_rows, Some(100));
        assert_eq!(config.relation_batch_size, 1);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"max_rows": 5}"#).unwrap();
        assert_eq!(config.max_rows, Some(5));
        assert_eq!(config.relation_batch_size, DEFAULT_RELATION_BATCH_SIZE);

        let config: DatabaseConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DatabaseConfig::default());
    }
}
