//! ormkit core - schema registry, row codec, query builder and execution engine.
//!
//! Entities describe themselves with an [`EntityDef`] and convert to and from
//! a dynamic [`Record`]. A [`Database`] registers their schemas, provisions
//! tables on a [`StorageBackend`], and runs queries built with the fluent
//! [`Select`] builder:
//!
//! ```ignore
//! let db = Database::new(SqliteBackend::open_in_memory()?);
//! db.set_logger(|query: &str, params: &[String]| println!("{query} {params:?}"));
//!
//! let users = db.repository::<User>()?;
//! users.delete_all()?;
//! users.add_all(&[alice, bob, carol])?;
//!
//! let hackers = users
//!     .select()
//!     .field("hacker").is_true()
//!     .or()
//!     .field("age").eq(4)
//!     .as_list()?;
//! ```

pub mod catalog;
pub mod codec;
pub mod engine;
pub mod error;
pub mod query;
pub mod storage;

pub use catalog::{
    Cardinality, DefaultValue, EntityDef, FetchStrategy, FieldDef, FieldType, RelationDef,
    ScalarType, Schema, SchemaRegistry, TableSchema,
};
pub use codec::{Entity, Record, RelationValue, RowCodec};
pub use engine::{Database, DatabaseConfig, ExecutionState, Repository};
pub use error::{Error, ExecutionError};
pub use query::{
    FieldFilter, FilterEvaluator, Junction, LoggerError, QueryLogger, Select, SelectQuery,
    SqlDialect, TracingLogger,
};
pub use storage::{SledBackend, SledConfig, SqliteBackend, SqliteConfig, StorageBackend};

/// Re-export protocol types.
pub use ormkit_proto as proto;
