//! Execution state tracking.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::trace;

/// Where the engine is in running a statement.
///
/// `Idle -> Compiling -> Executing -> Streaming -> Idle`. Writes skip
/// compilation and streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    /// No statement in flight.
    Idle = 0,
    /// Resolving and rendering a query.
    Compiling = 1,
    /// Statement handed to the backend, no row yet.
    Executing = 2,
    /// Rows are arriving and being decoded.
    Streaming = 3,
}

impl ExecutionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ExecutionState::Compiling,
            2 => ExecutionState::Executing,
            3 => ExecutionState::Streaming,
            _ => ExecutionState::Idle,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Idle => write!(f, "idle"),
            ExecutionState::Compiling => write!(f, "compiling"),
            ExecutionState::Executing => write!(f, "executing"),
            ExecutionState::Streaming => write!(f, "streaming"),
        }
    }
}

/// Shared cell holding the current state.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ExecutionState::Idle as u8))
    }

    pub(crate) fn get(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ExecutionState) {
        let previous = self.0.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            trace!(from = %ExecutionState::from_u8(previous), to = %state, "Execution state");
        }
    }

    /// Enter `state`; the returned guard resets to `Idle` when dropped,
    /// on success and on error alike.
    pub(crate) fn enter(&self, state: ExecutionState) -> StateGuard<'_> {
        self.set(state);
        StateGuard { cell: self }
    }
}

pub(crate) struct StateGuard<'a> {
    cell: &'a StateCell,
}

impl StateGuard<'_> {
    pub(crate) fn advance(&self, state: ExecutionState) {
        self.cell.set(state);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.cell.set(ExecutionState::Idle);
    }
}
