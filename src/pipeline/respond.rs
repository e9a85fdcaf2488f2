//! Response record filters
//!
//! After projection, an operation may filter whole records out of a list
//! result using caller-supplied predicates over the projected values:
//! `resp_eq`, `resp_in`, `resp_lt`, `resp_le`, `resp_gt`, `resp_ge` and
//! `resp_match`. `resp_eq` uses containment equality: a map matches when
//! all its keys match recursively, a list when it is a subset. A declared
//! filter field absent from a record is an invariant violation unless the
//! stage was built with `missing_ok`.

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::query::filter::cmp_scalars;

use super::{Next, Request, Stage};

pub(super) struct ResponseFilterStage {
    fields: Vec<String>,
    missing_ok: bool,
}

impl ResponseFilterStage {
    pub(super) fn new(fields: Vec<String>, missing_ok: bool) -> Self {
        Self { fields, missing_ok }
    }

    fn keep(&self, record: &Map<String, Value>, active: &[(String, Map<String, Value>)]) -> Result<bool> {
        for (field, predicate) in active {
            match record.get(field) {
                None => {
                    if self.missing_ok {
                        continue;
                    }
                    return Err(Error::invalid_response(format!(
                        "{} is not in the response record",
                        field
                    )));
                }
                Some(value) => {
                    if !matches_response(predicate, value)? {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

impl Stage for ResponseFilterStage {
    fn apply(&self, req: &mut Request, next: Next<'_>) -> Result<Value> {
        // capture the caller's predicates before the body consumes args
        let mut active = Vec::new();
        for field in &self.fields {
            if let Some(Value::Object(predicate)) = req.args.get(field) {
                active.push((field.clone(), predicate.clone()));
            }
        }

        let result = next.run(req)?;
        if active.is_empty() {
            return Ok(result);
        }
        match result {
            Value::Array(items) => {
                let mut kept = Vec::new();
                for item in items {
                    let keep = match item.as_object() {
                        Some(record) => self.keep(record, &active)?,
                        None => {
                            return Err(Error::invalid_response(format!(
                                "response {} is not a record",
                                item
                            )))
                        }
                    };
                    if keep {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            other => Ok(other),
        }
    }
}

/// Evaluate one response predicate against a projected value.
///
/// The first recognized operator wins; a predicate with no recognized
/// operator matches everything.
pub fn matches_response(predicate: &Map<String, Value>, value: &Value) -> Result<bool> {
    if let Some(check) = predicate.get("resp_eq") {
        return Ok(obj_equal(check, value));
    }
    if let Some(checks) = predicate.get("resp_in") {
        let Some(options) = checks.as_array() else {
            return Ok(true);
        };
        if options.is_empty() {
            return Ok(true);
        }
        return Ok(options.iter().any(|option| obj_equal(option, value)));
    }
    if let Some(bound) = predicate.get("resp_lt") {
        return Ok(cmp_scalars(value, bound).map_or(false, |o| o.is_lt()));
    }
    if let Some(bound) = predicate.get("resp_le") {
        return Ok(cmp_scalars(value, bound).map_or(false, |o| o.is_le()));
    }
    if let Some(bound) = predicate.get("resp_gt") {
        return Ok(cmp_scalars(value, bound).map_or(false, |o| o.is_gt()));
    }
    if let Some(bound) = predicate.get("resp_ge") {
        return Ok(cmp_scalars(value, bound).map_or(false, |o| o.is_ge()));
    }
    if let Some(pattern) = predicate.get("resp_match") {
        let Some(pattern) = pattern.as_str() else {
            return Ok(false);
        };
        // anchored at the start, like the rest of the pattern operators
        let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            Error::invalid_parameter(format!("invalid resp_match pattern {}: {}", pattern, e))
        })?;
        return Ok(value.as_str().map_or(false, |text| regex.is_match(text)));
    }
    Ok(true)
}

/// Containment equality: exact match, map-key containment, or list subset
fn obj_equal(check: &Value, value: &Value) -> bool {
    if check == value {
        return true;
    }
    match (check, value) {
        (Value::Object(check_map), Value::Object(value_map)) => check_map
            .iter()
            .all(|(key, check_value)| {
                value_map
                    .get(key)
                    .map_or(false, |actual| obj_equal(check_value, actual))
            }),
        (Value::Array(check_list), Value::Array(value_list)) => check_list
            .iter()
            .all(|check_item| value_list.contains(check_item)),
        _ => false,
    }
}
