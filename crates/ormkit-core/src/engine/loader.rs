//! Batched relation loading.
//!
//! Relations are resolved one level at a time: for each relation of a set of
//! rows, the keys of every row are gathered and fetched with `IN (...)`
//! queries chunked by the configured batch size, never one query per row.

use std::collections::{HashMap, HashSet};

use super::database::Database;
use crate::catalog::{
    FetchStrategy, RelationKind, RelationMapping, ScalarType, Schema, TableSchema,
    LINK_OWNER_COLUMN, LINK_POSITION_COLUMN, LINK_TARGET_COLUMN,
};
use crate::codec::{coerce, Decoded, Record, RelationValue, RowCodec};
use crate::error::Error;
use crate::query::{compile_key_select, compile_link_select, SelectQuery};
use crate::storage::StorageBackend;
use ormkit_proto::{Row, Value};

/// One link row: owner key, list position, target key.
type LinkEntry = (Value, i64, Value);

pub(crate) struct RelationLoader<'a> {
    db: &'a Database,
    backend: &'a dyn StorageBackend,
    codec: RowCodec<'a>,
}

impl<'a> RelationLoader<'a> {
    pub(crate) fn new(db: &'a Database, backend: &'a dyn StorageBackend) -> Self {
        Self {
            db,
            backend,
            codec: RowCodec::new(db.registry()),
        }
    }

    /// Attach relation values to decoded rows, in row order.
    ///
    /// `query` carries fetch overrides for the root level only.
    pub(crate) fn load(
        &self,
        schema: &Schema,
        rows: Vec<Decoded>,
        query: Option<&SelectQuery>,
    ) -> Result<Vec<Record>, Error> {
        let mut resolved = Vec::with_capacity(schema.relations.len());
        for rel in &schema.relations {
            let strategy = query
                .and_then(|q| q.fetch_override(&rel.name))
                .unwrap_or(rel.fetch);
            let values = match (strategy, &rel.kind) {
                (FetchStrategy::Skip, _) => {
                    rows.iter().map(|_| RelationValue::NotLoaded).collect()
                }
                (FetchStrategy::Eager, RelationKind::OneToOne { .. }) => self.load_one(rel, &rows)?,
                (FetchStrategy::Eager, RelationKind::OneToMany { link }) => {
                    self.load_many(schema, rel, link, &rows)?
                }
            };
            resolved.push((rel.name.clone(), values.into_iter()));
        }

        let mut records = Vec::with_capacity(rows.len());
        for decoded in rows {
            let mut record = decoded.record;
            for (name, values) in resolved.iter_mut() {
                record.set_relation(name.clone(), values.next().unwrap_or_default());
            }
            records.push(record);
        }
        Ok(records)
    }

    fn load_one(&self, rel: &RelationMapping, rows: &[Decoded]) -> Result<Vec<RelationValue>, Error> {
        let keys = rows
            .iter()
            .filter_map(|d| d.foreign_key(&rel.name))
            .filter(|k| !k.is_null())
            .cloned()
            .collect();
        let targets = self.fetch_targets(rel, keys)?;

        Ok(rows
            .iter()
            .map(|d| {
                // A dangling key loads as no target.
                let target = d
                    .foreign_key(&rel.name)
                    .filter(|k| !k.is_null())
                    .and_then(|k| targets.get(&k.key_bytes()))
                    .cloned();
                RelationValue::One(target.map(Box::new))
            })
            .collect())
    }

    fn load_many(
        &self,
        schema: &Schema,
        rel: &RelationMapping,
        link: &TableSchema,
        rows: &[Decoded],
    ) -> Result<Vec<RelationValue>, Error> {
        let owners = rows
            .iter()
            .filter_map(|d| d.primary_key(schema))
            .cloned()
            .collect();
        let links = self.fetch_links(schema, rel, link, owners)?;

        let target_keys = rows
            .iter()
            .filter_map(|d| d.primary_key(schema))
            .filter_map(|owner| links.get(&owner.key_bytes()))
            .flat_map(|entries| entries.iter().cloned())
            .collect();
        let targets = self.fetch_targets(rel, target_keys)?;

        Ok(rows
            .iter()
            .map(|d| {
                let children: Vec<Record> = d
                    .primary_key(schema)
                    .and_then(|owner| links.get(&owner.key_bytes()))
                    .map(|keys| {
                        keys.iter()
                            .filter_map(|k| targets.get(&k.key_bytes()).cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                RelationValue::Many(children)
            })
            .collect())
    }

    /// Target keys per owner key, in list order.
    pub(crate) fn fetch_links(
        &self,
        schema: &Schema,
        rel: &RelationMapping,
        link: &TableSchema,
        owners: Vec<Value>,
    ) -> Result<HashMap<Vec<u8>, Vec<Value>>, Error> {
        let owner_type = schema.primary_key.field_type.scalar_type();
        let mut grouped: HashMap<Vec<u8>, Vec<(i64, Value)>> = HashMap::new();

        for chunk in dedupe(owners).chunks(self.batch_size()) {
            let query = compile_link_select(link, chunk.to_vec(), self.db.dialect());
            let entries = self.db.stream(self.backend, &query, None, |row| {
                decode_link(schema, rel, owner_type, row)
            })?;
            for (owner, position, target) in entries {
                grouped
                    .entry(owner.key_bytes())
                    .or_default()
                    .push((position, target));
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(owner, mut entries)| {
                entries.sort_by_key(|(position, _)| *position);
                (owner, entries.into_iter().map(|(_, key)| key).collect())
            })
            .collect())
    }

    /// Fully loaded target records by primary key.
    fn fetch_targets(
        &self,
        rel: &RelationMapping,
        keys: Vec<Value>,
    ) -> Result<HashMap<Vec<u8>, Record>, Error> {
        let target = self.db.registry().require(&rel.target_entity)?;
        let mut found = HashMap::new();

        for chunk in dedupe(keys).chunks(self.batch_size()) {
            let query = compile_key_select(&target, chunk.to_vec(), self.db.dialect())?;
            let decoded = self
                .db
                .stream(self.backend, &query, None, |row| self.codec.decode(&target, row))?;
            for record in self.load(&target, decoded, None)? {
                if let Some(key) = record.get(&target.primary_key.field).map(Value::key_bytes) {
                    found.insert(key, record);
                }
            }
        }
        Ok(found)
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.db.config().relation_batch_size.max(1)
    }
}

/// Drop repeated keys, keeping first occurrences in order.
pub(super) fn dedupe(keys: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.key_bytes())).collect()
}

fn decode_link(
    schema: &Schema,
    rel: &RelationMapping,
    owner_type: ScalarType,
    mut row: Row,
) -> Result<LinkEntry, Error> {
    let mut column = |name: &str, ty: ScalarType| {
        let stored = row.take(name).unwrap_or(Value::Null);
        match coerce(stored, ty) {
            Ok(value) if !value.is_null() => Ok(value),
            Ok(value) | Err(value) => Err(Error::CodecMismatch {
                entity: schema.entity.clone(),
                field: format!("{}.{}", rel.name, name),
                expected: ty.name().to_string(),
                found: value.type_name().to_string(),
            }),
        }
    };

    let owner = column(LINK_OWNER_COLUMN, owner_type)?;
    let position = column(LINK_POSITION_COLUMN, ScalarType::Int64)?
        .as_i64()
        .unwrap_or_default();
    let target = column(LINK_TARGET_COLUMN, rel.target_key_type)?;
    Ok((owner, position, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let keys = vec![
            Value::Int64(3),
            Value::Int32(1),
            Value::Int64(3),
            Value::Int64(1),
            Value::Int64(2),
        ];
        assert_eq!(
            dedupe(keys),
            vec![Value::Int64(3), Value::Int32(1), Value::Int64(2)]
        );
    }
}
