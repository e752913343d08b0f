//! coursedb value and query specification types.
//!
//! This crate defines the caller-facing vocabulary shared by the core and
//! its callers:
//!
//! - [`value`] - Runtime values for operands and result rows
//! - [`query`] - Structured query specifications and fetch directives

pub mod query;
pub mod value;

// Re-export commonly used types at crate root
pub use query::{
    Condition, ConditionBuilder, FetchDirective, Operator, OrderDirection, OrderSpec, QuerySpec,
};
pub use value::Value;
