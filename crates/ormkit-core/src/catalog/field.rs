//! Field definitions for entities.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{FieldType, ScalarType};
use ormkit_proto::Value;
use serde::{Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type. Nullable types may be omitted on insert.
    pub field_type: FieldType,
    /// Column name override. Defaults to the field name.
    pub column: Option<String>,
    /// Default value if not provided.
    pub default: Option<DefaultValue>,
}

/// Default value for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
    /// Auto-generated UUID.
    AutoUuid,
}

impl FieldDef {
    /// Create a new field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            column: None,
            default: None,
        }
    }

    /// Create an optional scalar field.
    pub fn optional_scalar(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self::new(name, FieldType::OptionalScalar(scalar))
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Store the field under a different column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// The column this field is stored in.
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Check if this field has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Check if the field accepts null.
    pub fn is_nullable(&self) -> bool {
        self.field_type.is_nullable()
    }
}

impl DefaultValue {
    /// Produce the value this default stands for, at the time of the call.
    pub fn evaluate(&self) -> Value {
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Int(i) => Value::Int64(*i),
            DefaultValue::Float(f) => Value::Float64(*f),
            DefaultValue::String(s) => Value::String(s.clone()),
            DefaultValue::Bytes(b) => Value::Bytes(b.clone()),
            DefaultValue::CurrentTimestamp => Value::Timestamp(current_timestamp()),
            DefaultValue::AutoUuid => Value::Uuid(generate_id()),
        }
    }
}

/// Generate a new unique identifier with UUID v4 layout.
pub fn generate_id() -> [u8; 16] {
    // Counter to ensure uniqueness even with same timestamp
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&now.to_le_bytes());
    id[8..16].copy_from_slice(&counter.to_le_bytes());

    // Set UUID version 4 bits
    id[6] = (id[6] & 0x0f) | 0x40;
    id[8] = (id[8] & 0x3f) | 0x80;

    id
}

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_def_builder() {
        let field = FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
            .with_default(DefaultValue::AutoUuid)
            .with_column("user_id");

        assert_eq!(field.name, "id");
        assert_eq!(field.column_name(), "user_id");
        assert!(!field.is_nullable());
        assert!(field.has_default());
    }

    #[test]
    fn test_optional_field() {
        let field = FieldDef::optional_scalar("nickname", ScalarType::String);

        assert!(field.is_nullable());
        assert_eq!(field.column_name(), "nickname");
        assert!(!field.has_default());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a[6] >> 4, 4);
    }

    #[test]
    fn test_default_evaluation() {
        assert_eq!(DefaultValue::Int(7).evaluate(), Value::Int64(7));
        assert!(matches!(DefaultValue::AutoUuid.evaluate(), Value::Uuid(_)));
        match DefaultValue::CurrentTimestamp.evaluate() {
            Value::Timestamp(t) => assert!(t > 0),
            other => panic!("Expected timestamp, got {other:?}"),
        }
    }
}
