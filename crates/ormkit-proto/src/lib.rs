//! ormkit protocol types.
//!
//! This crate defines the backend-neutral types shared by the ormkit core and
//! every storage backend.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for rows and bound parameters
//! - [`row`] - Flat storage rows
//! - [`predicate`] - Immutable filter-expression trees
//! - [`query`] - Select plans and compiled queries
//! - [`error`] - Protocol error types
//!
//! Rows derive `rkyv::Archive` so backends can store them without a custom
//! byte format; everything else derives `serde` for inspection and tests.

pub mod error;
pub mod predicate;
pub mod query;
pub mod row;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use predicate::{Comparison, Connective, Predicate};
pub use query::{CompiledQuery, OrderDirection, OrderSpec, Pagination, SelectPlan};
pub use row::Row;
pub use value::{FromValue, Value};
