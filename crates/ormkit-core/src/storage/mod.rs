//! Storage backends.
//!
//! A backend owns tables of flat [`Row`]s. It receives compiled queries and
//! pushes result rows into a sink, one at a time, so the engine can decode
//! while rows stream in.

mod config;
mod sled_backend;
mod sqlite_backend;

pub use config::{SledConfig, SqliteConfig};
pub use sled_backend::SledBackend;
pub use sqlite_backend::SqliteBackend;

use crate::catalog::TableSchema;
use crate::error::Error;
use crate::query::SqlDialect;
use ormkit_proto::{CompiledQuery, Row, Value};

/// A store the engine can run statements against.
///
/// The engine serialises all calls, so implementations need not be `Sync`.
pub trait StorageBackend: Send {
    /// Rendering options for queries sent to this backend.
    fn dialect(&self) -> SqlDialect {
        SqlDialect::default()
    }

    /// Create a table if it does not exist.
    fn ensure_table(&self, table: &TableSchema) -> Result<(), Error>;

    /// Run a select, passing each result row to `sink` in result order.
    ///
    /// An error from `sink` stops execution and is returned as is.
    fn execute(
        &self,
        query: &CompiledQuery,
        sink: &mut dyn FnMut(Row) -> Result<(), Error>,
    ) -> Result<(), Error>;

    /// Insert rows into a table, all or nothing.
    fn insert_many(&self, table: &str, rows: &[Row]) -> Result<(), Error> {
        self.insert_batch(&[(table, rows)])
    }

    /// Insert rows into several tables as one unit: if any row is rejected,
    /// no table keeps any row of the batch.
    fn insert_batch(&self, batch: &[(&str, &[Row])]) -> Result<(), Error>;

    /// Remove every row of a table.
    fn delete_all(&self, table: &str) -> Result<(), Error>;

    /// Remove the rows of a table whose `column` holds one of `keys`.
    fn delete_keys(&self, table: &str, column: &str, keys: &[Value]) -> Result<(), Error>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn dialect(&self) -> SqlDialect {
        (**self).dialect()
    }

    fn ensure_table(&self, table: &TableSchema) -> Result<(), Error> {
        (**self).ensure_table(table)
    }

    fn execute(
        &self,
        query: &CompiledQuery,
        sink: &mut dyn FnMut(Row) -> Result<(), Error>,
    ) -> Result<(), Error> {
        (**self).execute(query, sink)
    }

    fn insert_many(&self, table: &str, rows: &[Row]) -> Result<(), Error> {
        (**self).insert_many(table, rows)
    }

    fn insert_batch(&self, batch: &[(&str, &[Row])]) -> Result<(), Error> {
        (**self).insert_batch(batch)
    }

    fn delete_all(&self, table: &str) -> Result<(), Error> {
        (**self).delete_all(table)
    }

    fn delete_keys(&self, table: &str, column: &str, keys: &[Value]) -> Result<(), Error> {
        (**self).delete_keys(table, column, keys)
    }
}
