//! Storage-level table descriptions handed to backends for provisioning.

use super::types::ScalarType;
use serde::{Deserialize, Serialize};

/// A column of a storage table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub column_type: ScalarType,
    /// Whether the column accepts null.
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a non-null column.
    pub fn new(name: impl Into<String>, column_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, column_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }
}

/// A storage table: ordered columns plus an optional primary key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in storage order.
    pub columns: Vec<ColumnDef>,
    /// Primary key column, if the table has one.
    pub primary_key: Option<String>,
}

impl TableSchema {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key column.
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in storage order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = TableSchema::new("user")
            .with_column(ColumnDef::new("id", ScalarType::Uuid))
            .with_column(ColumnDef::nullable("cat_id", ScalarType::Uuid))
            .with_primary_key("id");

        assert_eq!(table.column_names(), vec!["id", "cat_id"]);
        assert!(table.column("cat_id").unwrap().nullable);
        assert!(!table.column("id").unwrap().nullable);
        assert_eq!(table.primary_key.as_deref(), Some("id"));
        assert!(table.column("missing").is_none());
    }
}
