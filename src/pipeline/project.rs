//! Response projection stage
//!
//! Recursively reduces a record, a list of records, or nested collections
//! down to a declared allow-list of field names. Nested fields may carry
//! their own sub-projection. A non-record value reaching projection is an
//! internal invariant violation; `null` passes through for optional-lookup
//! operations.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};

use super::{Next, Request, Stage};

#[derive(Debug, Clone)]
enum FieldRule {
    Keep,
    Nested(Projection),
}

/// Allow-list of response fields with optional sub-projections
#[derive(Debug, Clone, Default)]
pub struct Projection {
    fields: BTreeMap<String, FieldRule>,
}

impl Projection {
    /// Project to the given fields, kept as-is
    pub fn new(fields: &[&str]) -> Self {
        let mut projection = Self::default();
        for field in fields {
            projection
                .fields
                .insert(field.to_string(), FieldRule::Keep);
        }
        projection
    }

    /// Keep `field`, projecting its value (record or collection) through
    /// `nested`
    pub fn with_nested(mut self, field: &str, nested: Projection) -> Self {
        self.fields
            .insert(field.to_string(), FieldRule::Nested(nested));
        self
    }

    /// Apply the projection to a record, list of records, or null
    pub fn apply(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                let projected: Result<Vec<Value>> =
                    items.iter().map(|item| self.apply(item)).collect();
                Ok(Value::Array(projected?))
            }
            Value::Object(record) => {
                let mut projected = serde_json::Map::new();
                for (field, rule) in &self.fields {
                    let Some(field_value) = record.get(field) else {
                        continue;
                    };
                    let kept = match rule {
                        FieldRule::Keep => field_value.clone(),
                        FieldRule::Nested(nested) => nested.apply(field_value)?,
                    };
                    projected.insert(field.clone(), kept);
                }
                Ok(Value::Object(projected))
            }
            other => Err(Error::invalid_response(format!(
                "response {} is not a record",
                other
            ))),
        }
    }
}

pub(super) struct ProjectStage {
    projection: Projection,
}

impl ProjectStage {
    pub(super) fn new(projection: Projection) -> Self {
        Self { projection }
    }
}

impl Stage for ProjectStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        let result = next.run(req)?;
        self.projection.apply(&result)
    }
}
