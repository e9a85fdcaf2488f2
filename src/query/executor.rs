//! Query executor
//!
//! Runs compiled predicates against store tables and performs record
//! creation, update and deletion with existence and uniqueness checks.
//! Every mutating operation opens (or joins) a transactional scope; a
//! failed hook or uniqueness check rolls the scope back.
//!
//! Single-record add/update run the entity's lifecycle hooks; the bulk
//! operations bypass them. Callers must not rely on hooks firing for bulk
//! paths.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{now_timestamp, EntityKind};
use crate::observability::Logger;
use crate::store::{record_id, MemoryStore, Record};

use super::filter::compile_filters;
use super::order::{sort_records, OrderBy};
use super::Filters;

/// Executes queries and mutations against the store
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    store: Arc<MemoryStore>,
}

impl QueryExecutor {
    /// Create an executor over the given store
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn matching(&self, kind: EntityKind, filters: &Filters) -> Result<Vec<Record>> {
        let conditions = compile_filters(kind, filters);
        Ok(self
            .store
            .scan(kind)?
            .into_iter()
            .filter(|record| conditions.iter().all(|condition| condition.matches(record)))
            .collect())
    }

    /// All matching records in order; an empty result is not an error
    pub fn list(
        &self,
        kind: EntityKind,
        filters: &Filters,
        order_by: &[OrderBy],
    ) -> Result<Vec<Record>> {
        let mut records = self.matching(kind, filters)?;
        sort_records(kind, &mut records, order_by);
        Ok(records)
    }

    /// First matching record.
    ///
    /// With `required` the miss raises `RecordNotExists` instead of
    /// returning `None`.
    pub fn get(
        &self,
        kind: EntityKind,
        filters: &Filters,
        required: bool,
    ) -> Result<Option<Record>> {
        let record = self.matching(kind, filters)?.into_iter().next();
        if record.is_none() && required {
            return Err(Error::record_not_exists(format!(
                "cannot find the record in table {}: {}",
                kind.table(),
                Value::Object(filters.clone())
            )));
        }
        Ok(record)
    }

    /// Record by id, raising `RecordNotExists` on a miss
    pub fn get_by_id(&self, kind: EntityKind, id: i64) -> Result<Record> {
        let mut filters = Filters::new();
        filters.insert("id".to_string(), Value::from(id));
        self.get(kind, &filters, true)?.ok_or_else(|| {
            Error::record_not_exists(format!("cannot find {} in table {}", id, kind.table()))
        })
    }

    /// Create a record keyed by `keys`, or return the existing one.
    ///
    /// If a record with the same key attributes exists: with
    /// `fail_on_existing` the call raises `DuplicatedRecord`; otherwise the
    /// existing record is returned untouched by `attrs`. A fresh record gets
    /// audit timestamps, the entity's `initialize` hook, declared-unique-key
    /// enforcement and the `validate` hook, in that order.
    pub fn add(
        &self,
        kind: EntityKind,
        keys: &[(&str, Value)],
        attrs: &Filters,
        fail_on_existing: bool,
    ) -> Result<Record> {
        self.store.transaction(|| {
            let mut key_filters = Filters::new();
            for (column, value) in keys {
                if !kind.has_column(column) {
                    return Err(Error::database_exception(format!(
                        "{} is not a column of table {}",
                        column,
                        kind.table()
                    )));
                }
                key_filters.insert(column.to_string(), value.clone());
            }

            if !key_filters.is_empty() {
                if let Some(existing) = self.get(kind, &key_filters, false)? {
                    if fail_on_existing {
                        return Err(Error::duplicated_record(format!(
                            "{} exists in table {}",
                            Value::Object(key_filters),
                            kind.table()
                        )));
                    }
                    Logger::debug(
                        "record_exists",
                        &[
                            ("table", kind.table().to_string()),
                            ("keys", Value::Object(key_filters).to_string()),
                        ],
                    );
                    return Ok(existing);
                }
            }

            let mut record = key_filters;
            for (key, value) in attrs {
                record.insert(key.clone(), value.clone());
            }
            if kind.has_timestamps() {
                let now = now_timestamp();
                record.insert("created_at".to_string(), Value::String(now.clone()));
                record.insert("updated_at".to_string(), Value::String(now));
            }
            kind.initialize(&mut record);
            self.check_unique(kind, &record, None)?;
            let stored = self.store.insert(kind, record)?;
            kind.validate(&stored)?;
            Logger::debug(
                "record_added",
                &[
                    ("table", kind.table().to_string()),
                    ("id", record_id(&stored).unwrap_or(0).to_string()),
                ],
            );
            Ok(stored)
        })
    }

    /// Apply attribute assignments to one record and persist it.
    ///
    /// Runs the entity's `on_update` and `validate` hooks.
    pub fn update(&self, kind: EntityKind, id: i64, attrs: &Filters) -> Result<Record> {
        self.store.transaction(|| {
            let mut record = self.get_by_id(kind, id)?;
            for (key, value) in attrs {
                record.insert(key.clone(), value.clone());
            }
            kind.on_update(&mut record);
            self.check_unique(kind, &record, Some(id))?;
            kind.validate(&record)?;
            self.store.replace(kind, id, record.clone())?;
            Logger::debug(
                "record_updated",
                &[("table", kind.table().to_string()), ("id", id.to_string())],
            );
            Ok(record)
        })
    }

    /// Apply attribute assignments to every matching record.
    ///
    /// Bulk path: lifecycle hooks are bypassed.
    pub fn update_many(
        &self,
        kind: EntityKind,
        filters: &Filters,
        attrs: &Filters,
    ) -> Result<Vec<Record>> {
        self.store.transaction(|| {
            let mut updated = Vec::new();
            for mut record in self.matching(kind, filters)? {
                for (key, value) in attrs {
                    record.insert(key.clone(), value.clone());
                }
                if let Some(id) = record_id(&record) {
                    self.store.replace(kind, id, record.clone())?;
                }
                updated.push(record);
            }
            Ok(updated)
        })
    }

    /// Delete one record by id, returning it
    pub fn delete(&self, kind: EntityKind, id: i64) -> Result<Record> {
        self.store.transaction(|| {
            let record = self.get_by_id(kind, id)?;
            self.store.remove(kind, id)?;
            Logger::debug(
                "record_deleted",
                &[("table", kind.table().to_string()), ("id", id.to_string())],
            );
            Ok(record)
        })
    }

    /// Delete every matching record.
    ///
    /// Bulk path: lifecycle hooks are bypassed.
    pub fn delete_many(&self, kind: EntityKind, filters: &Filters) -> Result<Vec<Record>> {
        self.store.transaction(|| {
            let records = self.matching(kind, filters)?;
            for record in &records {
                if let Some(id) = record_id(record) {
                    self.store.remove(kind, id)?;
                }
            }
            Ok(records)
        })
    }

    fn check_unique(
        &self,
        kind: EntityKind,
        record: &Record,
        exclude_id: Option<i64>,
    ) -> Result<()> {
        for key_set in kind.unique_keys() {
            let mut filters = Filters::new();
            let mut complete = true;
            for column in *key_set {
                match record.get(*column) {
                    Some(value) if !value.is_null() => {
                        filters.insert(column.to_string(), value.clone());
                    }
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            for existing in self.matching(kind, &filters)? {
                if record_id(&existing) != exclude_id {
                    return Err(Error::duplicated_record(format!(
                        "{} exists in table {}",
                        Value::Object(filters),
                        kind.table()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> QueryExecutor {
        QueryExecutor::new(Arc::new(MemoryStore::new()))
    }

    fn filters(value: Value) -> Filters {
        value.as_object().cloned().unwrap()
    }

    fn add_host(executor: &QueryExecutor, name: &str, os_id: i64) -> Record {
        executor
            .add(
                EntityKind::Host,
                &[("name", json!(name))],
                &filters(json!({ "os_id": os_id })),
                true,
            )
            .unwrap()
    }

    #[test]
    fn test_list_filters_and_orders() {
        let executor = executor();
        add_host(&executor, "c", 3);
        add_host(&executor, "a", 1);
        add_host(&executor, "b", 2);

        let hosts = executor
            .list(
                EntityKind::Host,
                &filters(json!({"os_id": {"ge": 2}})),
                &[OrderBy::asc("name")],
            )
            .unwrap();

        let names: Vec<&str> = hosts
            .iter()
            .filter_map(|h| h.get("name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_list_with_no_match_is_empty() {
        let executor = executor();
        add_host(&executor, "a", 1);

        let hosts = executor
            .list(EntityKind::Host, &filters(json!({"name": "zzz"})), &[])
            .unwrap();
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_get_required_miss_raises() {
        let executor = executor();
        let err = executor
            .get(EntityKind::Host, &filters(json!({"name": "nope"})), true)
            .unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_EXISTS");

        let missing = executor
            .get(EntityKind::Host, &filters(json!({"name": "nope"})), false)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_add_duplicate_key_raises() {
        let executor = executor();
        add_host(&executor, "a", 1);

        let err = executor
            .add(
                EntityKind::Host,
                &[("name", json!("a"))],
                &Filters::new(),
                true,
            )
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATED_RECORD");
    }

    #[test]
    fn test_add_existing_without_fail_returns_record_unchanged() {
        let executor = executor();
        add_host(&executor, "a", 1);

        let existing = executor
            .add(
                EntityKind::Host,
                &[("name", json!("a"))],
                &filters(json!({"os_id": 99})),
                false,
            )
            .unwrap();
        // extra attributes are not merged into the pre-existing record
        assert_eq!(existing.get("os_id"), Some(&json!(1)));
    }

    #[test]
    fn test_add_runs_initialize_and_sets_timestamps() {
        let executor = executor();
        let host = add_host(&executor, "a", 1);

        assert_eq!(host.get("hostname"), Some(&json!("a")));
        assert!(host.get("created_at").is_some());
        assert!(host.get("updated_at").is_some());
    }

    #[test]
    fn test_add_enforces_declared_unique_keys() {
        let executor = executor();
        executor
            .add(
                EntityKind::HostNetwork,
                &[("host_id", json!(1)), ("interface", json!("eth0"))],
                &filters(json!({"ip": "10.0.0.1"})),
                true,
            )
            .unwrap();

        // same ip on a different host trips the global uniqueness constraint
        let err = executor
            .add(
                EntityKind::HostNetwork,
                &[("host_id", json!(2)), ("interface", json!("eth0"))],
                &filters(json!({"ip": "10.0.0.1"})),
                true,
            )
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATED_RECORD");
    }

    #[test]
    fn test_add_with_unknown_key_column_is_database_exception() {
        let executor = executor();
        let err = executor
            .add(
                EntityKind::Host,
                &[("mac", json!("00:11:22:33:44:55"))],
                &Filters::new(),
                true,
            )
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_EXCEPTION");
    }

    #[test]
    fn test_failed_validate_rolls_back_create() {
        let executor = executor();
        let err = executor
            .add(
                EntityKind::HostNetwork,
                &[("host_id", json!(1)), ("interface", json!("eth0"))],
                &filters(json!({"ip": "not-an-ip"})),
                true,
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMETER");

        let rows = executor
            .list(EntityKind::HostNetwork, &Filters::new(), &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_update_applies_attrs_and_hooks() {
        let executor = executor();
        let host = add_host(&executor, "a", 1);
        let id = record_id(&host).unwrap();

        let updated = executor
            .update(EntityKind::Host, id, &filters(json!({"os_name": "CentOS"})))
            .unwrap();
        assert_eq!(updated.get("os_name"), Some(&json!("CentOS")));
    }

    #[test]
    fn test_update_unique_check_excludes_self() {
        let executor = executor();
        let host = add_host(&executor, "a", 1);
        let id = record_id(&host).unwrap();

        // rewriting the same unique name must not trip the constraint
        executor
            .update(EntityKind::Host, id, &filters(json!({"name": "a"})))
            .unwrap();

        add_host(&executor, "b", 2);
        let err = executor
            .update(EntityKind::Host, id, &filters(json!({"name": "b"})))
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATED_RECORD");
    }

    #[test]
    fn test_delete_and_bulk_delete() {
        let executor = executor();
        let host = add_host(&executor, "a", 1);
        add_host(&executor, "b", 1);
        add_host(&executor, "c", 2);

        executor
            .delete(EntityKind::Host, record_id(&host).unwrap())
            .unwrap();
        let removed = executor
            .delete_many(EntityKind::Host, &filters(json!({"os_id": 1})))
            .unwrap();
        assert_eq!(removed.len(), 1);

        let remaining = executor.list(EntityKind::Host, &Filters::new(), &[]).unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
