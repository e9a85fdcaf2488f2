//! Query compilation and execution
//!
//! The filter compiler turns caller filter expressions into predicates, the
//! ordering compiler into sort keys, and the executor applies both to store
//! tables with create/update/delete on top.

pub mod executor;
pub mod filter;
pub mod order;

/// Caller-supplied attribute filters: attribute name to filter expression
pub type Filters = serde_json::Map<String, serde_json::Value>;

pub use executor::QueryExecutor;
pub use filter::{compile_condition, compile_filters, Condition};
pub use order::{Direction, OrderBy};
