#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! OData query-option core: lexing, parsing, binding against a schema and
//! translation into a backend-agnostic [`QueryPlan`].
//!
//! ```rust,ignore
//! let engine = QueryEngine::new(schema);
//! let options = QueryOptions::parse_query("$filter=Age gt 30&$top=10")?;
//! let plan = engine.parse_and_bind(&options, "Sales.Customer", &CancellationToken::new())?;
//! ```
pub mod bind;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod limits;
pub mod options;
pub mod plan;
pub mod schema;
pub mod syntax;
pub mod translate;

pub use bind::{BoundKind, BoundNode, BoundOrderBy, PathStep, PropertyPath};
pub use cache::{CacheStats, PlanCache, PlanKey};
pub use config::{CacheConfig, EngineConfig};
pub use engine::{QueryEngine, parse_and_bind};
pub use error::{BindError, Diagnostic, Error, LexError, SyntaxError, TranslateError};
pub use executor::{ExecutionError, ExecutionResult, PlanExecutor};
pub use limits::ODataLimits;
pub use options::{QueryOption, QueryOptions};
pub use plan::{ExpandPlan, QueryPlan, Selection};
pub use schema::{Schema, SchemaBuilder, SchemaDescription, SchemaRegistry, SchemaVersion};
pub use syntax::SortDir;
pub use translate::translate;

pub use tokio_util::sync::CancellationToken;
