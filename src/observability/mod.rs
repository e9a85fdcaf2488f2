//! Observability for the data core

pub mod logger;

pub use logger::{Logger, Severity};
