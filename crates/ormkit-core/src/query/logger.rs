//! Query logger hook.
//!
//! A logger observes every statement right before it reaches the storage
//! backend. Logging is best effort: an error returned by the logger, or a
//! panic inside it, is reported through `tracing` and the statement runs
//! regardless.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a query logger.
#[derive(Debug, Error)]
#[error("query logger failed: {0}")]
pub struct LoggerError(pub String);

impl LoggerError {
    /// Create a logger error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Observer of executed statements.
///
/// Called on the thread running the statement, with the database's backend
/// lock held. The lock is reentrant, so a logger may query the same
/// database; those queries are logged too.
pub trait QueryLogger: Send + Sync {
    /// Called with the statement text and its parameters rendered as strings.
    fn on_query(&self, query: &str, params: &[String]) -> Result<(), LoggerError>;
}

impl<F> QueryLogger for F
where
    F: Fn(&str, &[String]) + Send + Sync,
{
    fn on_query(&self, query: &str, params: &[String]) -> Result<(), LoggerError> {
        self(query, params);
        Ok(())
    }
}

/// Logger forwarding statements to `tracing` on target `ormkit::query`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl QueryLogger for TracingLogger {
    fn on_query(&self, query: &str, params: &[String]) -> Result<(), LoggerError> {
        debug!(target: "ormkit::query", query, params = ?params, "Executing statement");
        Ok(())
    }
}

/// Invoke a logger, swallowing its failures.
pub(crate) fn notify(logger: &dyn QueryLogger, query: &str, params: &[String]) {
    match catch_unwind(AssertUnwindSafe(|| logger.on_query(query, params))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, query, "Query logger returned an error"),
        Err(payload) => warn!(
            panic = panic_message(payload.as_ref()),
            query,
            "Query logger panicked"
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
