//! Ordering compiler
//!
//! Compiles a list of (attribute, direction) pairs into a stable multi-key
//! sort over records. Unknown attributes are silently skipped.

use std::cmp::Ordering;

use serde_json::Value;

use crate::model::EntityKind;
use crate::store::Record;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering key
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    /// Ascending key
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending key
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Stable multi-key sort of `records`.
///
/// Keys naming attributes the entity does not declare are dropped; with no
/// remaining keys the input order is preserved.
pub fn sort_records(kind: EntityKind, records: &mut [Record], order_by: &[OrderBy]) {
    let keys: Vec<&OrderBy> = order_by
        .iter()
        .filter(|key| kind.has_column(&key.field))
        .collect();
    if keys.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in &keys {
            let ordering = compare_values(a.get(&key.field), b.get(&key.field));
            let ordering = match key.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Total order over JSON values for sorting.
///
/// Ordering rules: absent < null < bool < number < string; same types use
/// natural ordering; arrays and objects compare equal.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let type_order = |value: &Value| -> u8 {
                match value {
                    Value::Null => 0,
                    Value::Bool(_) => 1,
                    Value::Number(_) => 2,
                    Value::String(_) => 3,
                    Value::Array(_) => 4,
                    Value::Object(_) => 5,
                }
            };
            let rank = type_order(a).cmp(&type_order(b));
            if rank != Ordering::Equal {
                return rank;
            }
            match (a, b) {
                (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
                (Value::Number(x), Value::Number(y)) => {
                    let x = x.as_f64().unwrap_or(0.0);
                    let y = y.as_f64().unwrap_or(0.0);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                _ => Ordering::Equal,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host(name: &str, os_id: i64) -> Record {
        json!({"name": name, "os_id": os_id})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_sort_ascending() {
        let mut records = vec![host("c", 3), host("a", 1), host("b", 2)];
        sort_records(EntityKind::Host, &mut records, &[OrderBy::asc("name")]);
        assert_eq!(names(&records), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_descending() {
        let mut records = vec![host("c", 3), host("a", 1), host("b", 2)];
        sort_records(EntityKind::Host, &mut records, &[OrderBy::desc("os_id")]);
        assert_eq!(names(&records), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_multi_key_sort_is_stable() {
        let mut records = vec![host("b", 1), host("a", 1), host("c", 0)];
        sort_records(
            EntityKind::Host,
            &mut records,
            &[OrderBy::asc("os_id"), OrderBy::asc("name")],
        );
        assert_eq!(names(&records), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_unknown_key_is_skipped() {
        let mut records = vec![host("b", 2), host("a", 1)];
        sort_records(EntityKind::Host, &mut records, &[OrderBy::asc("flavor")]);
        // input order preserved
        assert_eq!(names(&records), vec!["b", "a"]);
    }

    #[test]
    fn test_missing_values_sort_first() {
        let mut records = vec![
            host("b", 2),
            json!({"name": "a"}).as_object().cloned().unwrap(),
        ];
        sort_records(EntityKind::Host, &mut records, &[OrderBy::asc("os_id")]);
        assert_eq!(names(&records), vec!["a", "b"]);
    }
}
