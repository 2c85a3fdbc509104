//! Query construction, compilation and in-process evaluation.
//!
//! The builder produces a [`SelectQuery`] over field names; the compiler
//! resolves it against a schema into a [`CompiledQuery`](ormkit_proto::CompiledQuery)
//! carrying both SQL text and a column-level plan. Backends without SQL run
//! the plan through [`FilterEvaluator`].

mod builder;
mod compiler;
mod filter;
mod logger;
mod select;

pub use builder::{FieldFilter, Junction, Select};
pub use compiler::{
    compile_key_select, compile_link_select, compile_select, delete_keys_statement, delete_statement,
    insert_statement, quote_ident, render_select, SqlDialect,
};
pub use filter::FilterEvaluator;
pub use logger::{LoggerError, QueryLogger, TracingLogger};
pub use select::SelectQuery;

pub(crate) use logger::notify;
