//! Schema catalog for ormkit.
//!
//! Entity, field and relation definitions, their resolution into table
//! mappings, and the registry that shares resolved schemas.

mod entity;
mod field;
mod registry;
mod relation;
mod schema;
mod table;
mod types;

pub use entity::EntityDef;
pub use field::{current_timestamp, generate_id, DefaultValue, FieldDef};
pub use registry::SchemaRegistry;
pub use relation::{Cardinality, FetchStrategy, RelationDef};
pub use schema::{
    FieldMapping, RelationKind, RelationMapping, Schema, LINK_OWNER_COLUMN, LINK_POSITION_COLUMN,
    LINK_TARGET_COLUMN,
};
pub use table::{ColumnDef, TableSchema};
pub use types::{FieldType, ScalarType};
