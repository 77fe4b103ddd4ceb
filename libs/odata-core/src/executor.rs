//! Capability implemented by backends that run a [`QueryPlan`].
//!
//! The core never calls an executor; it only produces the plan. Executors
//! own cancellation and timeout semantics of the execution itself.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::plan::QueryPlan;

/// Rows produced by an executor, plus the total when `$count=true`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionResult<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Runs plans against a data source of type `Source`.
pub trait PlanExecutor {
    type Source: ?Sized;
    type Item;

    /// Executes `plan` against `source`.
    ///
    /// # Errors
    /// Any backend failure, wrapped in [`ExecutionError`].
    fn execute(
        &self,
        plan: &QueryPlan,
        source: &Self::Source,
    ) -> Result<ExecutionResult<Self::Item>, ExecutionError>;
}

/// Opaque backend failure.
#[derive(Clone)]
pub struct ExecutionError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ExecutionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionError")
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ExecutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

/// Compares messages only; sources are opaque.
impl PartialEq for ExecutionError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::other("disk gone");
        let err = ExecutionError::new("scan failed").with_source(io);
        assert_eq!(err.to_string(), "scan failed");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk gone"));
        assert_eq!(err, ExecutionError::new("scan failed"));
    }
}
