//! Filter condition compiler
//!
//! Translates a caller-supplied filter expression into a boolean predicate
//! over a named attribute, or no constraint at all. Three value shapes are
//! accepted:
//!
//! - scalar: equality
//! - list: equality for one element, set membership for several; nested
//!   lists and operator maps compile recursively and OR-combine
//! - operator map: every present operator compiles independently and all
//!   are AND-combined (`eq`, `ne`, `lt`, `gt`, `le`, `ge`, `in`, `notin`,
//!   `startswith`, `endswith`, `like`, `between`)
//!
//! Matching is strict: no type coercion, missing or null attributes never
//! match any predicate.

use std::cmp::Ordering;

use serde_json::Value;

use crate::model::EntityKind;
use crate::store::Record;

use super::Filters;

/// A compiled boolean predicate over record attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    Le(String, Value),
    Ge(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// LIKE pattern: `%` any sequence, `_` one character, `\` escapes
    Like(String, String),
    /// Inclusive range
    Between(String, Value, Value),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Evaluate the predicate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::All(terms) => terms.iter().all(|term| term.matches(record)),
            Condition::Any(terms) => terms.iter().any(|term| term.matches(record)),
            Condition::Eq(field, expected) => {
                field_value(record, field).map_or(false, |actual| actual == expected)
            }
            Condition::Ne(field, expected) => {
                field_value(record, field).map_or(false, |actual| actual != expected)
            }
            Condition::Lt(field, bound) => compares(record, field, bound, Ordering::is_lt),
            Condition::Gt(field, bound) => compares(record, field, bound, Ordering::is_gt),
            Condition::Le(field, bound) => compares(record, field, bound, Ordering::is_le),
            Condition::Ge(field, bound) => compares(record, field, bound, Ordering::is_ge),
            Condition::In(field, set) => {
                field_value(record, field).map_or(false, |actual| set.contains(actual))
            }
            Condition::NotIn(field, set) => {
                field_value(record, field).map_or(false, |actual| !set.contains(actual))
            }
            Condition::Like(field, pattern) => field_value(record, field)
                .and_then(Value::as_str)
                .map_or(false, |actual| like_match(actual, pattern)),
            Condition::Between(field, low, high) => {
                compares(record, field, low, Ordering::is_ge)
                    && compares(record, field, high, Ordering::is_le)
            }
        }
    }
}

fn field_value<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    match record.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    }
}

fn compares(record: &Record, field: &str, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    field_value(record, field)
        .and_then(|actual| cmp_scalars(actual, bound))
        .map_or(false, accept)
}

/// Compare two scalar values; `None` for incomparable types
pub(crate) fn cmp_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64()?;
            let y = y.as_f64()?;
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Compile filter expressions for every known attribute of `kind`.
///
/// Attributes the entity does not declare are silently skipped, so one
/// filter payload can be shared across endpoints with different fields.
/// The returned conditions are AND-combined by the caller.
pub fn compile_filters(kind: EntityKind, filters: &Filters) -> Vec<Condition> {
    let mut conditions = Vec::new();
    for (attr, value) in filters {
        if !kind.has_column(attr) {
            continue;
        }
        if let Some(condition) = compile_condition(attr, value) {
            conditions.push(condition);
        }
    }
    conditions
}

/// Compile one attribute filter; `None` means the filter contributes no
/// constraint (e.g. an empty list).
pub fn compile_condition(attr: &str, value: &Value) -> Option<Condition> {
    match value {
        Value::Array(items) => compile_list(attr, items),
        Value::Object(operators) => compile_operator_map(attr, operators),
        scalar => Some(Condition::Eq(attr.to_string(), scalar.clone())),
    }
}

fn compile_list(attr: &str, items: &[Value]) -> Option<Condition> {
    let mut scalars = Vec::new();
    let mut composites = Vec::new();
    for item in items {
        match item {
            Value::Array(_) | Value::Object(_) => composites.push(item),
            scalar => scalars.push(scalar.clone()),
        }
    }

    let mut branches = Vec::new();
    if scalars.len() == 1 {
        branches.push(Condition::Eq(attr.to_string(), scalars.remove(0)));
    } else if !scalars.is_empty() {
        branches.push(Condition::In(attr.to_string(), scalars));
    }
    for composite in composites {
        if let Some(condition) = compile_condition(attr, composite) {
            branches.push(condition);
        }
    }
    collapse(branches, Condition::Any)
}

fn compile_operator_map(
    attr: &str,
    operators: &serde_json::Map<String, Value>,
) -> Option<Condition> {
    let mut terms = Vec::new();

    if let Some(value) = operators.get("eq") {
        if let Some(term) = compile_membership(attr, value, false) {
            terms.push(term);
        }
    }
    if let Some(value) = operators.get("ne") {
        if let Some(term) = compile_membership(attr, value, true) {
            terms.push(term);
        }
    }
    for (op, build) in [
        ("lt", Condition::Lt as fn(String, Value) -> Condition),
        ("gt", Condition::Gt),
        ("le", Condition::Le),
        ("ge", Condition::Ge),
    ] {
        if let Some(value) = operators.get(op) {
            if let Some(bound) = first_scalar(value) {
                terms.push(build(attr.to_string(), bound));
            }
        }
    }
    if let Some(value) = operators.get("in") {
        terms.push(Condition::In(attr.to_string(), value_set(value)));
    }
    if let Some(value) = operators.get("notin") {
        terms.push(Condition::NotIn(attr.to_string(), value_set(value)));
    }
    if let Some(value) = operators.get("startswith") {
        if let Some(term) = compile_patterns(attr, value, |text| format!("{}%", text)) {
            terms.push(term);
        }
    }
    if let Some(value) = operators.get("endswith") {
        if let Some(term) = compile_patterns(attr, value, |text| format!("%{}", text)) {
            terms.push(term);
        }
    }
    if let Some(value) = operators.get("like") {
        if let Some(term) = compile_patterns(attr, value, |text| format!("%{}%", text)) {
            terms.push(term);
        }
    }
    if let Some(value) = operators.get("between") {
        if let Some(term) = compile_between(attr, value) {
            terms.push(term);
        }
    }

    collapse(terms, Condition::All)
}

/// `eq`/`ne` accept a scalar or a list; a list means (not-)membership
fn compile_membership(attr: &str, value: &Value, negate: bool) -> Option<Condition> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            if items.len() == 1 {
                let item = items[0].clone();
                return Some(if negate {
                    Condition::Ne(attr.to_string(), item)
                } else {
                    Condition::Eq(attr.to_string(), item)
                });
            }
            Some(if negate {
                Condition::NotIn(attr.to_string(), items.clone())
            } else {
                Condition::In(attr.to_string(), items.clone())
            })
        }
        scalar => Some(if negate {
            Condition::Ne(attr.to_string(), scalar.clone())
        } else {
            Condition::Eq(attr.to_string(), scalar.clone())
        }),
    }
}

/// Comparison bounds take a scalar; of a list only the first element is used
fn first_scalar(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.first().cloned(),
        Value::Null => None,
        scalar => Some(scalar.clone()),
    }
}

fn value_set(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    }
}

fn compile_patterns(
    attr: &str,
    value: &Value,
    build: impl Fn(&str) -> String,
) -> Option<Condition> {
    let needles: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(text_of).collect(),
        scalar => text_of(scalar).into_iter().collect(),
    };
    let branches: Vec<Condition> = needles
        .iter()
        .map(|needle| Condition::Like(attr.to_string(), build(&escape_like(needle))))
        .collect();
    collapse(branches, Condition::Any)
}

fn compile_between(attr: &str, value: &Value) -> Option<Condition> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    match (pair[0].is_null(), pair[1].is_null()) {
        (true, true) => None,
        (true, false) => Some(Condition::Le(attr.to_string(), pair[1].clone())),
        (false, true) => Some(Condition::Ge(attr.to_string(), pair[0].clone())),
        (false, false) => Some(Condition::Between(
            attr.to_string(),
            pair[0].clone(),
            pair[1].clone(),
        )),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn collapse(mut terms: Vec<Condition>, combine: fn(Vec<Condition>) -> Condition) -> Option<Condition> {
    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(combine(terms)),
    }
}

/// Escape LIKE metacharacters in user data so it matches literally
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Match `value` against a LIKE pattern (case-sensitive)
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match_at(&value, &pattern)
}

fn like_match_at(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some((&'%', rest)) => (0..=value.len()).any(|skip| like_match_at(&value[skip..], rest)),
        Some((&'\\', rest)) => match rest.split_first() {
            Some((literal, after)) => value
                .split_first()
                .map_or(false, |(c, tail)| c == literal && like_match_at(tail, after)),
            // a lone trailing backslash stands for itself
            None => value == ['\\'],
        },
        Some((&'_', rest)) => value
            .split_first()
            .map_or(false, |(_, tail)| like_match_at(tail, rest)),
        Some((ch, rest)) => value
            .split_first()
            .map_or(false, |(c, tail)| c == ch && like_match_at(tail, rest)),
    }
}
