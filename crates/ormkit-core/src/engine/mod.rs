//! Execution engine.
//!
//! [`Database`] owns the storage backend, the schema registry and the query
//! logger slot. It compiles queries, runs them, streams decoded records and
//! loads relations; [`Repository`] is its typed front end.

mod cascade;
mod config;
mod database;
mod loader;
mod repository;
mod state;

pub use config::{DatabaseConfig, DEFAULT_RELATION_BATCH_SIZE};
pub use database::Database;
pub use repository::Repository;
pub use state::ExecutionState;
