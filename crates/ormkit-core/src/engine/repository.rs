//! Typed access to one entity.

use std::marker::PhantomData;
use std::sync::Arc;

use super::database::Database;
use crate::catalog::Schema;
use crate::codec::Entity;
use crate::error::Error;
use crate::query::Select;

/// Typed handle for inserting, deleting and querying one entity type.
pub struct Repository<'db, E> {
    db: &'db Database,
    schema: Arc<Schema>,
    _entity: PhantomData<fn() -> E>,
}

impl<'db, E: Entity> Repository<'db, E> {
    pub(crate) fn new(db: &'db Database, schema: Arc<Schema>) -> Self {
        Self {
            db,
            schema,
            _entity: PhantomData,
        }
    }

    /// Insert one entity with everything it owns.
    ///
    /// Returns the entity as stored, with defaults and generated keys.
    pub fn add(&self, entity: &E) -> Result<E, Error> {
        let mut stored = self.add_all(std::slice::from_ref(entity))?;
        stored.pop().ok_or_else(|| {
            Error::InvalidQuery(format!("insert of '{}' returned no record", self.schema.entity))
        })
    }

    /// Insert entities in order, as one operation.
    pub fn add_all(&self, entities: &[E]) -> Result<Vec<E>, Error> {
        let records = entities.iter().map(E::to_record).collect();
        self.db
            .insert(&self.schema.entity, records)?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    /// Delete every entity of this type and everything they own.
    pub fn delete_all(&self) -> Result<(), Error> {
        self.db.delete_all(&self.schema.entity)
    }

    /// Start a query over this entity.
    pub fn select(&self) -> Select<'db, E> {
        Select::new(self.db, self.schema.entity.clone())
    }

    /// The entity's resolved schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The database this repository runs against.
    pub fn database(&self) -> &'db Database {
        self.db
    }
}

impl<E> Clone for Repository<'_, E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            schema: self.schema.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for Repository<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.schema.entity)
            .field("table", &self.schema.table.name)
            .finish()
    }
}
