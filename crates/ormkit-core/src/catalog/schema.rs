//! Resolved schemas: an entity definition mapped onto tables and columns.

use std::collections::HashSet;

use super::entity::EntityDef;
use super::field::DefaultValue;
use super::relation::{Cardinality, FetchStrategy};
use super::table::{ColumnDef, TableSchema};
use super::types::{FieldType, ScalarType};
use crate::error::Error;

/// Link table column holding the owner's primary key.
pub const LINK_OWNER_COLUMN: &str = "owner_id";
/// Link table column holding the list position.
pub const LINK_POSITION_COLUMN: &str = "position";
/// Link table column holding the target's primary key.
pub const LINK_TARGET_COLUMN: &str = "target_id";

/// A scalar field mapped to its column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    /// Field name.
    pub field: String,
    /// Column name.
    pub column: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Default filled in before insert.
    pub default: Option<DefaultValue>,
}

/// How a relation is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    /// Nullable foreign key column on the owner's table.
    OneToOne {
        /// Foreign key column.
        column: String,
    },
    /// Link table of `(owner_id, position, target_id)` rows.
    OneToMany {
        /// The link table.
        link: TableSchema,
    },
}

/// A relation mapped to its storage.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationMapping {
    /// Relation name.
    pub name: String,
    /// Target entity name.
    pub target_entity: String,
    /// Target entity's table.
    pub target_table: String,
    /// Target primary key type.
    pub target_key_type: ScalarType,
    /// Default fetch strategy.
    pub fetch: FetchStrategy,
    /// Storage layout.
    pub kind: RelationKind,
}

/// Immutable mapping from an entity to its table and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Entity name.
    pub entity: String,
    /// The entity's table.
    pub table: TableSchema,
    /// Primary key field.
    pub primary_key: FieldMapping,
    /// Scalar fields in declaration order (primary key included).
    pub fields: Vec<FieldMapping>,
    /// Relations in declaration order.
    pub relations: Vec<RelationMapping>,
}

impl Schema {
    /// Resolve a definition into a schema.
    ///
    /// Relation targets are inspected for their table and key type only; they
    /// are resolved separately by the registry.
    pub fn resolve(def: &EntityDef) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidSchema {
            entity: def.name.clone(),
            reason,
        };

        if def.name.is_empty() {
            return Err(invalid("entity name is empty".into()));
        }

        let identity = def.get_identity_field().ok_or_else(|| {
            invalid(format!(
                "primary key field '{}' is not defined",
                def.identity_field
            ))
        })?;
        if identity.is_nullable() {
            return Err(invalid(format!(
                "primary key field '{}' must not be optional",
                identity.name
            )));
        }

        let table_name = def.table_name();
        let mut table = TableSchema::new(table_name.clone()).with_primary_key(identity.column_name());
        let mut field_names = HashSet::new();
        let mut columns = HashSet::new();
        let mut fields = Vec::with_capacity(def.fields.len());

        for field in &def.fields {
            if !field_names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            let column = field.column_name().to_string();
            if !columns.insert(column.clone()) {
                return Err(invalid(format!("duplicate column '{column}'")));
            }
            table.columns.push(ColumnDef {
                name: column.clone(),
                column_type: field.field_type.scalar_type(),
                nullable: field.is_nullable(),
            });
            fields.push(FieldMapping {
                field: field.name.clone(),
                column,
                field_type: field.field_type,
                default: field.default.clone(),
            });
        }

        let mut relation_names = HashSet::new();
        let mut relations = Vec::with_capacity(def.relations.len());
        let owner_key_type = identity.field_type.scalar_type();

        for rel in &def.relations {
            if field_names.contains(rel.name.as_str()) {
                return Err(invalid(format!(
                    "relation '{}' collides with a field of the same name",
                    rel.name
                )));
            }
            if !relation_names.insert(rel.name.as_str()) {
                return Err(invalid(format!("duplicate relation '{}'", rel.name)));
            }

            let target = rel.target_def();
            let target_key = target.get_identity_field().ok_or_else(|| {
                invalid(format!(
                    "target '{}' of relation '{}' has no primary key field '{}'",
                    target.name, rel.name, target.identity_field
                ))
            })?;
            let target_key_type = target_key.field_type.scalar_type();

            let kind = match rel.cardinality {
                Cardinality::OneToOne => {
                    let column = rel.foreign_key_column();
                    if !columns.insert(column.clone()) {
                        return Err(invalid(format!(
                            "foreign key column '{column}' of relation '{}' collides with another column",
                            rel.name
                        )));
                    }
                    table
                        .columns
                        .push(ColumnDef::nullable(column.clone(), target_key_type));
                    RelationKind::OneToOne { column }
                }
                Cardinality::OneToMany => RelationKind::OneToMany {
                    link: TableSchema::new(format!("{}_{}", table_name, rel.name))
                        .with_column(ColumnDef::new(LINK_OWNER_COLUMN, owner_key_type))
                        .with_column(ColumnDef::new(LINK_POSITION_COLUMN, ScalarType::Int64))
                        .with_column(ColumnDef::new(LINK_TARGET_COLUMN, target_key_type)),
                },
            };

            relations.push(RelationMapping {
                name: rel.name.clone(),
                target_entity: target.name.clone(),
                target_table: target.table_name(),
                target_key_type,
                fetch: rel.fetch,
                kind,
            });
        }

        let primary_key = fields
            .iter()
            .find(|f| f.field == identity.name)
            .cloned()
            .ok_or_else(|| invalid("primary key mapping missing".into()))?;

        Ok(Self {
            entity: def.name.clone(),
            table,
            primary_key,
            fields,
            relations,
        })
    }

    /// Get a field mapping by field name.
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Get a field mapping, failing with `UnknownField`.
    pub fn require_field(&self, name: &str) -> Result<&FieldMapping, Error> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            entity: self.entity.clone(),
            field: name.to_string(),
        })
    }

    /// Get a relation mapping by name.
    pub fn relation(&self, name: &str) -> Option<&RelationMapping> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Get a relation mapping, failing with `UnknownRelation`.
    pub fn require_relation(&self, name: &str) -> Result<&RelationMapping, Error> {
        self.relation(name).ok_or_else(|| Error::UnknownRelation {
            entity: self.entity.clone(),
            relation: name.to_string(),
        })
    }

    /// Every table this schema stores rows in: its own plus its link tables.
    pub fn tables(&self) -> Vec<&TableSchema> {
        let mut tables = vec![&self.table];
        tables.extend(self.relations.iter().filter_map(|r| match &r.kind {
            RelationKind::OneToMany { link } => Some(link),
            RelationKind::OneToOne { .. } => None,
        }));
        tables
    }

    /// Columns read by a select, in storage order.
    pub fn column_names(&self) -> Vec<String> {
        self.table.column_names()
    }
}
