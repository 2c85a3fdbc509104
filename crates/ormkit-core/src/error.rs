//! Core error types.

use thiserror::Error;

/// Core ORM errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A conflicting mapping is already registered for the same table or entity.
    #[error("'{name}' is already mapped by entity '{existing}', conflicting mapping from '{entity}'")]
    DuplicateSchema {
        /// Table or entity name that collides.
        name: String,
        /// Entity owning the existing mapping.
        existing: String,
        /// Entity whose registration failed.
        entity: String,
    },

    /// An entity definition cannot be turned into a schema.
    #[error("invalid schema for '{entity}': {reason}")]
    InvalidSchema { entity: String, reason: String },

    /// Entity is not registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// Field does not exist on the entity.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Relation does not exist on the entity.
    #[error("unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// A required field has no value and no default.
    #[error("missing required field '{field}' on entity '{entity}'")]
    MissingField { entity: String, field: String },

    /// A value's type disagrees with the schema's declared type.
    #[error("codec mismatch on {entity}.{field}: expected {expected}, found {found}")]
    CodecMismatch {
        entity: String,
        field: String,
        expected: String,
        found: String,
    },

    /// The query cannot be compiled against the schema.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The storage backend failed.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Storage backend failures.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// SQLite error, including constraint violations.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Sled storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Stored bytes could not be encoded or decoded.
    #[error("row codec error: {0}")]
    Codec(#[from] ormkit_proto::Error),

    /// A write violated a table constraint.
    #[error("constraint violation on table '{table}': {reason}")]
    ConstraintViolation { table: String, reason: String },

    /// The backend has no such table.
    #[error("table '{0}' does not exist")]
    MissingTable(String),

    /// The query produced more rows than the configured limit.
    #[error("query returned more than {limit} rows")]
    RowLimitExceeded { limit: usize },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Execution(e.into())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Execution(e.into())
    }
}

impl From<ormkit_proto::Error> for Error {
    fn from(e: ormkit_proto::Error) -> Self {
        Error::Execution(e.into())
    }
}

impl Error {
    /// Whether this error came from the storage backend.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution(_))
    }
}
