//! Host and cluster lifecycle controllers
//!
//! Pipeline-wrapped operation surfaces over the query executor, plus the
//! editability/readiness rules that keep host, cluster-membership and
//! cluster records consistent.

pub mod cluster;
pub mod host;
pub mod rules;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::query::Filters;
use crate::store::{record_id, Record};

pub use cluster::ClusterService;
pub use host::{HostRef, HostService};

/// Id of a stored record; a record without one is a storage-layer misuse
pub(crate) fn require_id(record: &Record) -> Result<i64> {
    record_id(record)
        .ok_or_else(|| Error::database_exception("record has no id field".to_string()))
}

/// Build a filter map from literal pairs
pub(crate) fn filters_of(pairs: &[(&str, Value)]) -> Filters {
    let mut filters = Filters::new();
    for (key, value) in pairs {
        filters.insert(key.to_string(), value.clone());
    }
    filters
}
