//! rigger - data access, request pipeline and host lifecycle core for a
//! cluster deployment manager
//!
//! The crate turns declarative filter expressions into predicates over an
//! in-memory relational store, wraps every operation in a fixed pipeline of
//! cross-cutting stages (rename, keyword validation, permission check,
//! transaction, field validation, projection, response filters), and
//! encodes the lifecycle rules deciding when a managed host and its
//! network/config/state sub-records may be mutated. Long-running actions
//! are handed to an external task executor through a fire-and-forget port.

pub mod error;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod tasks;

pub use error::{Error, Result};
