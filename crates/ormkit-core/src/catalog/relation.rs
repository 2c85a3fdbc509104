//! Relation definitions between entities.

use std::fmt;

use super::entity::EntityDef;
use serde::{Deserialize, Serialize};

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// The owner holds at most one target (foreign key column on the owner).
    OneToOne,
    /// The owner holds an ordered list of targets (link table).
    OneToMany,
}

/// How a relation is loaded when its owner is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchStrategy {
    /// Load with one batched follow-up query per relation level.
    #[default]
    Eager,
    /// Do not load; the relation decodes as not loaded.
    Skip,
}

/// An owned relation from one entity to another.
///
/// The target is given as a constructor for its definition so entity types
/// can reference each other without a registry being available.
#[derive(Clone)]
pub struct RelationDef {
    /// Relation name (unique within the owning entity).
    pub name: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Target entity definition.
    pub target: fn() -> EntityDef,
    /// Default fetch strategy.
    pub fetch: FetchStrategy,
    /// Foreign key column override for one-to-one relations.
    pub column: Option<String>,
}

impl RelationDef {
    /// Create a one-to-one relation.
    pub fn one_to_one(name: impl Into<String>, target: fn() -> EntityDef) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::OneToOne,
            target,
            fetch: FetchStrategy::Eager,
            column: None,
        }
    }

    /// Create a one-to-many relation.
    pub fn one_to_many(name: impl Into<String>, target: fn() -> EntityDef) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::OneToMany,
            target,
            fetch: FetchStrategy::Eager,
            column: None,
        }
    }

    /// Set the default fetch strategy.
    pub fn with_fetch(mut self, fetch: FetchStrategy) -> Self {
        self.fetch = fetch;
        self
    }

    /// Override the foreign key column of a one-to-one relation.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Build the target entity definition.
    pub fn target_def(&self) -> EntityDef {
        (self.target)()
    }

    /// Foreign key column on the owner for one-to-one relations.
    pub fn foreign_key_column(&self) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("target", &self.target_def().name)
            .field("fetch", &self.fetch)
            .field("column", &self.column)
            .finish()
    }
}
