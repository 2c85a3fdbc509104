//! Schema registry: resolves entity definitions once and shares them read-only.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::entity::EntityDef;
use super::schema::Schema;
use super::table::TableSchema;
use crate::codec::Entity;
use crate::error::Error;

#[derive(Default)]
struct RegistryInner {
    by_entity: HashMap<String, Arc<Schema>>,
    /// Table name to owning entity name, link tables included.
    by_table: HashMap<String, String>,
    by_type: HashMap<TypeId, Arc<Schema>>,
}

/// Registry of resolved schemas.
///
/// Registration resolves an entity and every relation target it owns. A
/// registration either commits the whole tree or nothing.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<RegistryInner>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Idempotent per type.
    pub fn register<E: Entity>(&self) -> Result<Arc<Schema>, Error> {
        let type_id = TypeId::of::<E>();
        if let Some(schema) = self.inner.read().by_type.get(&type_id) {
            return Ok(schema.clone());
        }

        let schema = self.register_def(E::entity_def())?;
        self.inner.write().by_type.insert(type_id, schema.clone());
        Ok(schema)
    }

    /// Register an entity definition and its relation targets.
    ///
    /// An identical mapping already present is returned as is; a different
    /// mapping for a known entity, table or link table is rejected.
    pub fn register_def(&self, def: EntityDef) -> Result<Arc<Schema>, Error> {
        let mut inner = self.inner.write();
        let mut staged: Vec<Arc<Schema>> = Vec::new();
        let mut visiting: Vec<String> = Vec::new();

        let root = Self::stage(&inner, &def, &mut staged, &mut visiting)?;

        for schema in staged {
            for table in schema.tables() {
                inner
                    .by_table
                    .insert(table.name.clone(), schema.entity.clone());
            }
            debug!(
                entity = %schema.entity,
                table = %schema.table.name,
                "Registered schema"
            );
            inner.by_entity.insert(schema.entity.clone(), schema);
        }

        Ok(root)
    }

    fn stage(
        inner: &RegistryInner,
        def: &EntityDef,
        staged: &mut Vec<Arc<Schema>>,
        visiting: &mut Vec<String>,
    ) -> Result<Arc<Schema>, Error> {
        if visiting.contains(&def.name) {
            return Err(Error::InvalidSchema {
                entity: def.name.clone(),
                reason: format!("ownership cycle: {} -> {}", visiting.join(" -> "), def.name),
            });
        }

        let schema = Schema::resolve(def)?;

        let existing = inner
            .by_entity
            .get(&schema.entity)
            .or_else(|| staged.iter().find(|s| s.entity == schema.entity));
        if let Some(existing) = existing {
            if **existing == schema {
                return Ok(existing.clone());
            }
            return Err(Error::DuplicateSchema {
                name: schema.entity.clone(),
                existing: existing.entity.clone(),
                entity: schema.entity.clone(),
            });
        }

        for table in schema.tables() {
            let owner = inner.by_table.get(&table.name).cloned().or_else(|| {
                staged
                    .iter()
                    .find(|s| s.tables().iter().any(|t| t.name == table.name))
                    .map(|s| s.entity.clone())
            });
            if let Some(owner) = owner {
                return Err(Error::DuplicateSchema {
                    name: table.name.clone(),
                    existing: owner,
                    entity: schema.entity.clone(),
                });
            }
        }
        // Link tables of one entity must not collide with each other either.
        let tables = schema.tables();
        for (i, table) in tables.iter().enumerate() {
            if tables[..i].iter().any(|t| t.name == table.name) {
                return Err(Error::InvalidSchema {
                    entity: schema.entity.clone(),
                    reason: format!("table '{}' is used twice", table.name),
                });
            }
        }

        visiting.push(def.name.clone());
        for rel in &def.relations {
            let target = rel.target_def();
            Self::stage(inner, &target, staged, visiting)?;
        }
        visiting.pop();

        let schema = Arc::new(schema);
        staged.push(schema.clone());
        Ok(schema)
    }

    /// Look up a schema by entity name.
    pub fn get(&self, entity: &str) -> Option<Arc<Schema>> {
        self.inner.read().by_entity.get(entity).cloned()
    }

    /// Look up a schema by entity name, failing with `UnknownEntity`.
    pub fn require(&self, entity: &str) -> Result<Arc<Schema>, Error> {
        self.get(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }

    /// Look up the schema registered for a Rust type.
    pub fn get_type<E: Entity>(&self) -> Option<Arc<Schema>> {
        self.inner.read().by_type.get(&TypeId::of::<E>()).cloned()
    }

    /// Look up the schema owning a table (entity table or link table).
    pub fn by_table(&self, table: &str) -> Option<Arc<Schema>> {
        let inner = self.inner.read();
        inner
            .by_table
            .get(table)
            .and_then(|entity| inner.by_entity.get(entity))
            .cloned()
    }

    /// Registered entity names, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().by_entity.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every storage table known to the registry, sorted by name.
    pub fn tables(&self) -> Vec<TableSchema> {
        let inner = self.inner.read();
        let mut tables: Vec<TableSchema> = inner
            .by_entity
            .values()
            .flat_map(|s| s.tables().into_iter().cloned())
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Tables holding rows owned by `entity`: its own, its link tables, and
    /// those of every owned target, depth first, without duplicates.
    pub fn owned_tables(&self, entity: &str) -> Result<Vec<TableSchema>, Error> {
        let mut out: Vec<TableSchema> = Vec::new();
        self.collect_owned(entity, &mut out)?;
        Ok(out)
    }

    fn collect_owned(&self, entity: &str, out: &mut Vec<TableSchema>) -> Result<(), Error> {
        let schema = self.require(entity)?;
        for table in schema.tables() {
            if !out.iter().any(|t| t.name == table.name) {
                out.push(table.clone());
            }
        }
        for rel in &schema.relations {
            self.collect_owned(&rel.target_entity, out)?;
        }
        Ok(())
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.read().by_entity.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, FieldType, RelationDef, ScalarType};

    fn cat() -> EntityDef {
        EntityDef::new("Cat", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
    }

    fn dog() -> EntityDef {
        EntityDef::new("Dog", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
    }

    fn user() -> EntityDef {
        EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
            .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
            .with_relation(RelationDef::one_to_one("cat", cat))
            .with_relation(RelationDef::one_to_many("dogs", dog))
    }

    fn looping() -> EntityDef {
        EntityDef::new("Node", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
            .with_relation(RelationDef::one_to_one("next", looping))
    }

    #[test]
    fn test_register_tree() {
        let registry = SchemaRegistry::new();
        let schema = registry.register_def(user()).unwrap();

        assert_eq!(schema.entity, "User");
        assert_eq!(registry.entities(), vec!["Cat", "Dog", "User"]);
        let tables: Vec<String> = registry.tables().into_iter().map(|t| t.name).collect();
        assert_eq!(tables, vec!["cat", "dog", "user", "user_dogs"]);
        assert_eq!(registry.by_table("user_dogs").unwrap().entity, "User");
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SchemaRegistry::new();
        let first = registry.register_def(user()).unwrap();
        let second = registry.register_def(user()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_conflicting_table_is_rejected() {
        let registry = SchemaRegistry::new();
        registry.register_def(user()).unwrap();

        let impostor = EntityDef::new("Person", "id")
            .with_table("user")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)));
        match registry.register_def(impostor) {
            Err(Error::DuplicateSchema { name, existing, entity }) => {
                assert_eq!(name, "user");
                assert_eq!(existing, "User");
                assert_eq!(entity, "Person");
            }
            other => panic!("Expected DuplicateSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_entity_is_rejected() {
        let registry = SchemaRegistry::new();
        registry.register_def(cat()).unwrap();

        let other_cat = EntityDef::new("Cat", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)));
        assert!(matches!(
            registry.register_def(other_cat),
            Err(Error::DuplicateSchema { .. })
        ));
    }

    #[test]
    fn test_failed_registration_commits_nothing() {
        let registry = SchemaRegistry::new();
        registry
            .register_def(
                EntityDef::new("Squatter", "id")
                    .with_table("dog")
                    .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64))),
            )
            .unwrap();

        assert!(registry.register_def(user()).is_err());
        assert!(registry.get("User").is_none());
        assert!(registry.get("Cat").is_none());
        assert_eq!(registry.entities(), vec!["Squatter"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register_def(looping()),
            Err(Error::InvalidSchema { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_owned_tables() {
        let registry = SchemaRegistry::new();
        registry.register_def(user()).unwrap();

        let owned: Vec<String> = registry
            .owned_tables("User")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(owned, vec!["user", "user_dogs", "cat", "dog"]);
        assert!(matches!(
            registry.owned_tables("Ghost"),
            Err(Error::UnknownEntity(_))
        ));
    }
}
