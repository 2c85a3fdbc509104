//! Deleting rows together with the rows they own.
//!
//! Only rows reachable from the deleted owners go: a target entity may also
//! be stored on its own, or owned by another entity, and those rows stay.

use super::database::Database;
use super::loader::{dedupe, RelationLoader};
use crate::catalog::{RelationKind, Schema, TableSchema, LINK_OWNER_COLUMN};
use crate::codec::{Decoded, RowCodec};
use crate::error::Error;
use crate::query::{
    compile_key_select, compile_select, delete_keys_statement, delete_statement, SelectQuery,
};
use crate::storage::StorageBackend;
use ormkit_proto::Value;

pub(crate) struct Cascade<'a> {
    db: &'a Database,
    backend: &'a dyn StorageBackend,
    codec: RowCodec<'a>,
    loader: RelationLoader<'a>,
}

impl<'a> Cascade<'a> {
    pub(crate) fn new(db: &'a Database, backend: &'a dyn StorageBackend) -> Self {
        Self {
            db,
            backend,
            codec: RowCodec::new(db.registry()),
            loader: RelationLoader::new(db, backend),
        }
    }

    /// Delete every row of `schema`'s table and everything those rows own.
    pub(crate) fn delete_all(&self, schema: &Schema) -> Result<(), Error> {
        self.delete(schema, None)
    }

    /// Delete the rows of `schema` with the given primary keys, or all rows
    /// when `keys` is `None`, then the targets they own.
    fn delete(&self, schema: &Schema, keys: Option<&[Value]>) -> Result<(), Error> {
        if schema.relations.is_empty() {
            return match keys {
                None => self.clear(&schema.table.name),
                Some(keys) => {
                    self.delete_keys(&schema.table.name, &schema.primary_key.column, keys)
                }
            };
        }

        // Read everything reachable before writing anything.
        let owners = self.owners(schema, keys)?;
        let owner_keys: Vec<Value> = owners
            .iter()
            .filter_map(|d| d.primary_key(schema))
            .cloned()
            .collect();

        let mut links: Vec<&TableSchema> = Vec::new();
        let mut owned = Vec::with_capacity(schema.relations.len());
        for rel in &schema.relations {
            let targets: Vec<Value> = match &rel.kind {
                RelationKind::OneToOne { .. } => owners
                    .iter()
                    .filter_map(|d| d.foreign_key(&rel.name))
                    .filter(|k| !k.is_null())
                    .cloned()
                    .collect(),
                RelationKind::OneToMany { link } => {
                    links.push(link);
                    self.loader
                        .fetch_links(schema, rel, link, owner_keys.clone())?
                        .into_values()
                        .flatten()
                        .collect()
                }
            };
            owned.push((rel.target_entity.as_str(), targets));
        }

        match keys {
            None => {
                self.clear(&schema.table.name)?;
                for link in &links {
                    self.clear(&link.name)?;
                }
            }
            Some(_) => {
                self.delete_keys(&schema.table.name, &schema.primary_key.column, &owner_keys)?;
                for link in &links {
                    self.delete_keys(&link.name, LINK_OWNER_COLUMN, &owner_keys)?;
                }
            }
        }

        for (entity, targets) in owned {
            if !targets.is_empty() {
                let target = self.db.registry().require(entity)?;
                self.delete(&target, Some(&targets))?;
            }
        }
        Ok(())
    }

    fn owners(&self, schema: &Schema, keys: Option<&[Value]>) -> Result<Vec<Decoded>, Error> {
        let Some(keys) = keys else {
            let all = SelectQuery::new(schema.entity.clone());
            let query = compile_select(schema, &all, self.db.dialect())?;
            return self
                .db
                .stream(self.backend, &query, None, |row| self.codec.decode(schema, row));
        };

        let mut out = Vec::new();
        for chunk in dedupe(keys.to_vec()).chunks(self.loader.batch_size()) {
            let query = compile_key_select(schema, chunk.to_vec(), self.db.dialect())?;
            out.extend(
                self.db
                    .stream(self.backend, &query, None, |row| self.codec.decode(schema, row))?,
            );
        }
        Ok(out)
    }

    fn clear(&self, table: &str) -> Result<(), Error> {
        self.db.log_statement(&delete_statement(table), &[]);
        self.backend.delete_all(table)
    }

    fn delete_keys(&self, table: &str, column: &str, keys: &[Value]) -> Result<(), Error> {
        for chunk in dedupe(keys.to_vec()).chunks(self.loader.batch_size()) {
            let (text, params) = delete_keys_statement(table, column, chunk);
            self.db.log_statement(&text, &params);
            self.backend.delete_keys(table, column, chunk)?;
        }
        Ok(())
    }
}
