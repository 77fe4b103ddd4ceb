#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Reference [`PlanExecutor`](odata_core::PlanExecutor) that runs query plans
//! over JSON instances held in memory.
//!
//! ```rust,ignore
//! let plan = engine.parse_and_bind(&options, "Sales.Customer", &CancellationToken::new())?;
//! let page = MemoryExecutor.execute(&plan, &customers)?;
//! ```
mod error;
mod eval;
mod executor;
mod value;

pub use error::EvalError;
pub use eval::TYPE_ANNOTATION;
pub use executor::MemoryExecutor;
