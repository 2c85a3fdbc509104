//! Flattening records into rows and reconstructing them.

use ormkit_proto::{Row, Value};

use super::record::{Record, RelationValue};
use crate::catalog::{
    FieldMapping, RelationKind, Schema, SchemaRegistry, ScalarType, LINK_OWNER_COLUMN,
    LINK_POSITION_COLUMN, LINK_TARGET_COLUMN,
};
use crate::error::Error;

/// Coerce a value to a declared scalar type.
///
/// Accepts the representations storage backends hand back: integers for
/// `Bool` and `Timestamp`, 16-byte blobs for `Uuid`, integers of either width
/// for integer and float columns. `Null` passes through; nullability is the
/// caller's concern. On failure the original value is returned.
pub fn coerce(value: Value, ty: ScalarType) -> Result<Value, Value> {
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ScalarType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ScalarType::Bool, v @ (Value::Int32(_) | Value::Int64(_))) => match v.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err(v),
        },
        (ScalarType::Int32, v @ (Value::Int32(_) | Value::Int64(_))) => {
            v.as_i32().map(Value::Int32).ok_or(v)
        }
        (ScalarType::Int64, v @ (Value::Int32(_) | Value::Int64(_))) => {
            v.as_i64().map(Value::Int64).ok_or(v)
        }
        (ScalarType::Float64, Value::Float64(f)) => Ok(Value::Float64(f)),
        (ScalarType::Float64, Value::Int32(i)) => Ok(Value::Float64(i as f64)),
        (ScalarType::Float64, Value::Int64(i)) => Ok(Value::Float64(i as f64)),
        (ScalarType::String, Value::String(s)) => Ok(Value::String(s)),
        (ScalarType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
        (ScalarType::Timestamp, Value::Timestamp(t)) => Ok(Value::Timestamp(t)),
        (ScalarType::Timestamp, v @ (Value::Int32(_) | Value::Int64(_))) => {
            v.as_i64().map(Value::Timestamp).ok_or(v)
        }
        (ScalarType::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
        (ScalarType::Uuid, Value::Bytes(b)) => {
            let uuid: Option<[u8; 16]> = b.as_slice().try_into().ok();
            uuid.map(Value::Uuid).ok_or(Value::Bytes(b))
        }
        (_, other) => Err(other),
    }
}

/// Rows produced by encoding, grouped per table in first-appearance order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowBatch {
    tables: Vec<(String, Vec<Row>)>,
}

impl RowBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row for a table.
    pub fn push(&mut self, table: &str, row: Row) {
        match self.tables.iter_mut().find(|(name, _)| name == table) {
            Some((_, rows)) => rows.push(row),
            None => self.tables.push((table.to_string(), vec![row])),
        }
    }

    /// Rows queued for a table.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[])
    }

    /// Tables and their rows, in first-appearance order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    /// Total number of rows.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows.len()).sum()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// A decoded row: the record's scalar fields plus unresolved foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Record with scalar fields set and no relations.
    pub record: Record,
    /// One-to-one relation name to target key (`Null` when unset).
    pub foreign_keys: Vec<(String, Value)>,
}

impl Decoded {
    /// The record's primary key value.
    pub fn primary_key(&self, schema: &Schema) -> Option<&Value> {
        self.record.get(&schema.primary_key.field)
    }

    /// The target key stored for a one-to-one relation.
    pub fn foreign_key(&self, relation: &str) -> Option<&Value> {
        self.foreign_keys
            .iter()
            .find(|(name, _)| name == relation)
            .map(|(_, v)| v)
    }
}

/// Encodes records into rows and decodes rows into records.
///
/// Needs the registry to reach the schemas of relation targets.
pub struct RowCodec<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> RowCodec<'a> {
    /// Create a codec over a registry.
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Fill defaults for missing or null fields, recursively for owned targets.
    pub fn prepare(&self, schema: &Schema, record: &mut Record) -> Result<(), Error> {
        for field in &schema.fields {
            let Some(default) = &field.default else {
                continue;
            };
            if record.get(&field.field).map_or(true, Value::is_null) {
                record.set(field.field.clone(), default.evaluate());
            }
        }

        for rel in &schema.relations {
            let Some(value) = record.relation_mut(&rel.name) else {
                continue;
            };
            let target = self.registry.require(&rel.target_entity)?;
            match value {
                RelationValue::One(Some(child)) => self.prepare(&target, child)?,
                RelationValue::Many(children) => {
                    for child in children.iter_mut() {
                        self.prepare(&target, child)?;
                    }
                }
                RelationValue::One(None) | RelationValue::NotLoaded => {}
            }
        }
        Ok(())
    }

    /// Flatten a record into its own table's row.
    ///
    /// One-to-one relations become the target's key in the foreign key column.
    pub fn encode_row(&self, schema: &Schema, record: &Record) -> Result<Row, Error> {
        self.check_shape(schema, record)?;

        let mut row = Row::default();
        for field in &schema.fields {
            let value = encode_field(schema, field, record.get(&field.field))?;
            row.push(field.column.clone(), value);
        }

        for rel in &schema.relations {
            if let RelationKind::OneToOne { column } = &rel.kind {
                let key = match record.relation(&rel.name) {
                    Some(RelationValue::One(Some(target))) => {
                        let target_schema = self.registry.require(&rel.target_entity)?;
                        primary_key_of(&target_schema, target)?
                    }
                    _ => Value::Null,
                };
                row.push(column.clone(), key);
            }
        }
        Ok(row)
    }

    /// Flatten a record and everything it owns into `batch`.
    pub fn encode(&self, schema: &Schema, record: &Record, batch: &mut RowBatch) -> Result<(), Error> {
        let row = self.encode_row(schema, record)?;
        let owner_key = primary_key_of(schema, record)?;
        batch.push(&schema.table.name, row);

        for rel in &schema.relations {
            let Some(value) = record.relation(&rel.name) else {
                continue;
            };
            let target_schema = self.registry.require(&rel.target_entity)?;
            match (&rel.kind, value) {
                (RelationKind::OneToOne { .. }, RelationValue::One(Some(target))) => {
                    self.encode(&target_schema, target, batch)?;
                }
                (RelationKind::OneToMany { link }, RelationValue::Many(targets)) => {
                    for (position, target) in targets.iter().enumerate() {
                        self.encode(&target_schema, target, batch)?;
                        let link_row = Row::default()
                            .with(LINK_OWNER_COLUMN, owner_key.clone())
                            .with(LINK_POSITION_COLUMN, Value::Int64(position as i64))
                            .with(LINK_TARGET_COLUMN, primary_key_of(&target_schema, target)?);
                        batch.push(&link.name, link_row);
                    }
                }
                (_, RelationValue::NotLoaded) | (RelationKind::OneToOne { .. }, RelationValue::One(None)) => {}
                (_, other) => {
                    return Err(Error::CodecMismatch {
                        entity: schema.entity.clone(),
                        field: rel.name.clone(),
                        expected: relation_shape(&rel.kind).to_string(),
                        found: value_shape(other).to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rebuild the scalar part of a record from a row of this schema's table.
    pub fn decode(&self, schema: &Schema, mut row: Row) -> Result<Decoded, Error> {
        let mut record = Record::new(schema.entity.clone());
        for field in &schema.fields {
            let stored = row.take(&field.column).ok_or_else(|| Error::MissingField {
                entity: schema.entity.clone(),
                field: field.field.clone(),
            })?;
            let value = decode_value(schema, field, stored)?;
            record.fields.push((field.field.clone(), value));
        }

        let mut foreign_keys = Vec::new();
        for rel in &schema.relations {
            if let RelationKind::OneToOne { column } = &rel.kind {
                let stored = row.take(column).unwrap_or(Value::Null);
                let key = coerce(stored, rel.target_key_type).map_err(|found| {
                    Error::CodecMismatch {
                        entity: schema.entity.clone(),
                        field: column.clone(),
                        expected: rel.target_key_type.name().to_string(),
                        found: found.type_name().to_string(),
                    }
                })?;
                foreign_keys.push((rel.name.clone(), key));
            }
        }

        Ok(Decoded {
            record,
            foreign_keys,
        })
    }

    fn check_shape(&self, schema: &Schema, record: &Record) -> Result<(), Error> {
        if record.entity != schema.entity {
            return Err(Error::InvalidQuery(format!(
                "record of '{}' cannot be stored as '{}'",
                record.entity, schema.entity
            )));
        }
        if let Some((name, _)) = record.fields.iter().find(|(n, _)| schema.field(n).is_none()) {
            return Err(Error::UnknownField {
                entity: schema.entity.clone(),
                field: name.clone(),
            });
        }
        if let Some((name, _)) = record
            .relations
            .iter()
            .find(|(n, _)| schema.relation(n).is_none())
        {
            return Err(Error::UnknownRelation {
                entity: schema.entity.clone(),
                relation: name.clone(),
            });
        }
        Ok(())
    }
}

fn encode_field(schema: &Schema, field: &FieldMapping, value: Option<&Value>) -> Result<Value, Error> {
    let value = value.cloned().unwrap_or(Value::Null);
    if value.is_null() {
        if field.field_type.is_nullable() {
            return Ok(Value::Null);
        }
        return Err(Error::MissingField {
            entity: schema.entity.clone(),
            field: field.field.clone(),
        });
    }
    let ty = field.field_type.scalar_type();
    coerce(value, ty).map_err(|found| Error::CodecMismatch {
        entity: schema.entity.clone(),
        field: field.field.clone(),
        expected: ty.name().to_string(),
        found: found.type_name().to_string(),
    })
}

fn decode_value(schema: &Schema, field: &FieldMapping, stored: Value) -> Result<Value, Error> {
    let ty = field.field_type.scalar_type();
    let mismatch = |found: &Value| Error::CodecMismatch {
        entity: schema.entity.clone(),
        field: field.field.clone(),
        expected: ty.name().to_string(),
        found: found.type_name().to_string(),
    };
    if stored.is_null() && !field.field_type.is_nullable() {
        return Err(mismatch(&stored));
    }
    coerce(stored, ty).map_err(|found| mismatch(&found))
}

fn primary_key_of(schema: &Schema, record: &Record) -> Result<Value, Error> {
    encode_field(schema, &schema.primary_key, record.get(&schema.primary_key.field))
}

fn relation_shape(kind: &RelationKind) -> &'static str {
    match kind {
        RelationKind::OneToOne { .. } => "one",
        RelationKind::OneToMany { .. } => "many",
    }
}

fn value_shape(value: &RelationValue) -> &'static str {
    match value {
        RelationValue::One(_) => "one",
        RelationValue::Many(_) => "many",
        RelationValue::NotLoaded => "not loaded",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefaultValue, EntityDef, FieldDef, FieldType, RelationDef};

    fn cat() -> EntityDef {
        EntityDef::new("Cat", "id")
            .with_field(
                FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
                    .with_default(DefaultValue::AutoUuid),
            )
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
    }

    fn dog() -> EntityDef {
        EntityDef::new("Dog", "id")
            .with_field(
                FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
                    .with_default(DefaultValue::AutoUuid),
            )
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
    }

    fn user() -> EntityDef {
        EntityDef::new("User", "id")
            .with_field(
                FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
                    .with_default(DefaultValue::AutoUuid),
            )
            .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
            .with_field(FieldDef::new("hacker", FieldType::scalar(ScalarType::Bool)))
            .with_field(FieldDef::optional_scalar("nickname", ScalarType::String))
            .with_relation(RelationDef::one_to_one("cat", cat))
            .with_relation(RelationDef::one_to_many("dogs", dog))
    }

    fn setup() -> (SchemaRegistry, std::sync::Arc<Schema>) {
        let registry = SchemaRegistry::new();
        let schema = registry.register_def(user()).unwrap();
        (registry, schema)
    }

    fn florent() -> Record {
        Record::new("User")
            .with_field("age", 21)
            .with_field("hacker", true)
            .with_one("cat", Some(Record::new("Cat").with_field("name", "Eleanor")))
            .with_many(
                "dogs",
                vec![
                    Record::new("Dog").with_field("name", "Rex"),
                    Record::new("Dog").with_field("name", "Fido"),
                ],
            )
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(Value::Int64(1), ScalarType::Bool), Ok(Value::Bool(true)));
        assert_eq!(coerce(Value::Int64(2), ScalarType::Bool), Err(Value::Int64(2)));
        assert_eq!(coerce(Value::Int64(4), ScalarType::Int32), Ok(Value::Int32(4)));
        assert!(coerce(Value::Int64(i64::MAX), ScalarType::Int32).is_err());
        assert_eq!(coerce(Value::Int32(3), ScalarType::Float64), Ok(Value::Float64(3.0)));
        assert_eq!(
            coerce(Value::Bytes(vec![7; 16]), ScalarType::Uuid),
            Ok(Value::Uuid([7; 16]))
        );
        assert!(coerce(Value::Bytes(vec![7; 3]), ScalarType::Uuid).is_err());
        assert_eq!(coerce(Value::Int64(5), ScalarType::Timestamp), Ok(Value::Timestamp(5)));
        assert_eq!(coerce(Value::Null, ScalarType::String), Ok(Value::Null));
        assert!(coerce(Value::String("4".into()), ScalarType::Int32).is_err());
    }

    #[test]
    fn test_prepare_fills_defaults_recursively() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let mut record = florent();
        codec.prepare(&schema, &mut record).unwrap();

        assert!(matches!(record.get("id"), Some(Value::Uuid(_))));
        match record.relation("cat") {
            Some(RelationValue::One(Some(cat))) => assert!(matches!(cat.get("id"), Some(Value::Uuid(_)))),
            other => panic!("Expected cat, got {other:?}"),
        }
        match record.relation("dogs") {
            Some(RelationValue::Many(dogs)) => {
                assert!(dogs.iter().all(|d| matches!(d.get("id"), Some(Value::Uuid(_)))));
            }
            other => panic!("Expected dogs, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_emits_owned_rows_and_links() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let mut record = florent();
        codec.prepare(&schema, &mut record).unwrap();

        let mut batch = RowBatch::new();
        codec.encode(&schema, &record, &mut batch).unwrap();

        let tables: Vec<&str> = batch.tables().map(|(t, _)| t).collect();
        assert_eq!(tables, vec!["user", "cat", "dog", "user_dogs"]);
        assert_eq!(batch.row_count(), 6);

        let user_row = &batch.rows("user")[0];
        let names: Vec<&str> = user_row.column_names().collect();
        assert_eq!(names, vec!["id", "age", "hacker", "nickname", "cat_id"]);
        assert_eq!(user_row.get("nickname"), Some(&Value::Null));
        assert_eq!(user_row.get("cat_id"), batch.rows("cat")[0].get("id"));

        let links = batch.rows("user_dogs");
        assert_eq!(links[1].get(LINK_POSITION_COLUMN), Some(&Value::Int64(1)));
        assert_eq!(links[1].get(LINK_TARGET_COLUMN), batch.rows("dog")[1].get("id"));
        assert_eq!(links[0].get(LINK_OWNER_COLUMN), user_row.get("id"));
    }

    #[test]
    fn test_encode_missing_required_field() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let record = Record::new("User")
            .with_field("id", Value::Uuid([1; 16]))
            .with_field("hacker", false);

        match codec.encode_row(&schema, &record) {
            Err(Error::MissingField { field, .. }) => assert_eq!(field, "age"),
            other => panic!("Expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_wrong_type_and_unknown_field() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let mut record = florent().with_field("age", "old");
        codec.prepare(&schema, &mut record).unwrap();
        assert!(matches!(
            codec.encode_row(&schema, &record),
            Err(Error::CodecMismatch { .. })
        ));

        let record = florent().with_field("id", Value::Uuid([1; 16])).with_field("shoe", 4);
        assert!(matches!(
            codec.encode_row(&schema, &record),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_decode_roundtrip() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let mut record = florent();
        codec.prepare(&schema, &mut record).unwrap();
        let row = codec.encode_row(&schema, &record).unwrap();

        let decoded = codec.decode(&schema, row).unwrap();
        assert_eq!(decoded.record.get("age"), Some(&Value::Int32(21)));
        assert_eq!(decoded.record.get("nickname"), Some(&Value::Null));
        assert_eq!(decoded.primary_key(&schema), record.get("id"));
        assert!(matches!(decoded.foreign_key("cat"), Some(Value::Uuid(_))));
        assert!(decoded.record.relations.is_empty());
    }

    #[test]
    fn test_decode_coerces_backend_integers() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let row = Row::default()
            .with("id", Value::Bytes(vec![3; 16]))
            .with("age", Value::Int64(30))
            .with("hacker", Value::Int64(1))
            .with("nickname", Value::Null)
            .with("cat_id", Value::Null);

        let decoded = codec.decode(&schema, row).unwrap();
        assert_eq!(decoded.record.get("id"), Some(&Value::Uuid([3; 16])));
        assert_eq!(decoded.record.get("age"), Some(&Value::Int32(30)));
        assert_eq!(decoded.record.get("hacker"), Some(&Value::Bool(true)));
        assert_eq!(decoded.foreign_key("cat"), Some(&Value::Null));
    }

    #[test]
    fn test_decode_mismatch() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let row = Row::default()
            .with("id", Value::Uuid([3; 16]))
            .with("age", "twenty")
            .with("hacker", true)
            .with("nickname", Value::Null)
            .with("cat_id", Value::Null);

        match codec.decode(&schema, row) {
            Err(Error::CodecMismatch { field, expected, found, .. }) => {
                assert_eq!(field, "age");
                assert_eq!(expected, "int32");
                assert_eq!(found, "string");
            }
            other => panic!("Expected CodecMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_null_in_required_column() {
        let (registry, schema) = setup();
        let codec = RowCodec::new(&registry);
        let row = Row::default()
            .with("id", Value::Uuid([3; 16]))
            .with("age", Value::Null)
            .with("hacker", true)
            .with("nickname", Value::Null)
            .with("cat_id", Value::Null);

        assert!(matches!(
            codec.decode(&schema, row),
            Err(Error::CodecMismatch { .. })
        ));
    }
}
