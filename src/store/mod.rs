//! In-memory relational store
//!
//! One table per entity kind, rows keyed by auto-increment id. The store is
//! the only shared mutable resource in the core; operations lock briefly and
//! never hold the lock across a transaction body.
//!
//! Transactions are re-entrant: nested calls join the outer scope instead of
//! opening a new one. The outermost scope snapshots the tables on begin,
//! commits on success and restores the snapshot on error.

pub mod record;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::model::EntityKind;
use crate::observability::Logger;

pub use record::{bool_field, i64_field, merge_values, record_id, str_field, Record};

type Table = BTreeMap<i64, Record>;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<EntityKind, Table>,
    next_id: BTreeMap<EntityKind, i64>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: Tables,
    txn_depth: usize,
    snapshot: Option<Tables>,
}

/// In-memory table store with re-entrant transactions
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|e| Error::database_exception(format!("store lock poisoned: {}", e)))
    }

    /// Run `body` inside a transactional scope.
    ///
    /// A nested call joins the enclosing scope; only the outermost scope
    /// commits or rolls back. Any error from `body` rolls the outermost
    /// scope back to its begin snapshot.
    pub fn transaction<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        {
            let mut inner = self.locked()?;
            if inner.txn_depth == 0 {
                inner.snapshot = Some(inner.tables.clone());
            }
            inner.txn_depth += 1;
        }

        let result = body();

        let mut inner = self.locked()?;
        inner.txn_depth -= 1;
        if inner.txn_depth == 0 {
            match &result {
                Ok(_) => {
                    inner.snapshot = None;
                }
                Err(error) => {
                    Logger::debug(
                        "transaction_rollback",
                        &[("error", error.to_string())],
                    );
                    if let Some(snapshot) = inner.snapshot.take() {
                        inner.tables = snapshot;
                    }
                }
            }
        }
        result
    }

    /// Insert a record, assigning the next id for the table.
    ///
    /// Returns the stored record with its `id` field set.
    pub fn insert(&self, kind: EntityKind, mut record: Record) -> Result<Record> {
        let mut inner = self.locked()?;
        let id = {
            let next = inner.tables.next_id.entry(kind).or_insert(1);
            let id = *next;
            *next += 1;
            id
        };
        record.insert("id".to_string(), serde_json::Value::from(id));
        inner
            .tables
            .rows
            .entry(kind)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    /// Fetch one record by id
    pub fn fetch(&self, kind: EntityKind, id: i64) -> Result<Option<Record>> {
        let inner = self.locked()?;
        Ok(inner
            .tables
            .rows
            .get(&kind)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    /// All rows of a table in id order
    pub fn scan(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let inner = self.locked()?;
        Ok(inner
            .tables
            .rows
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Replace an existing record wholesale
    pub fn replace(&self, kind: EntityKind, id: i64, record: Record) -> Result<()> {
        let mut inner = self.locked()?;
        let table = inner.tables.rows.entry(kind).or_default();
        if !table.contains_key(&id) {
            return Err(Error::database_exception(format!(
                "no row {} in table {}",
                id,
                kind.table()
            )));
        }
        table.insert(id, record);
        Ok(())
    }

    /// Remove a record by id, returning it if present
    pub fn remove(&self, kind: EntityKind, id: i64) -> Result<Option<Record>> {
        let mut inner = self.locked()?;
        Ok(inner
            .tables
            .rows
            .get_mut(&kind)
            .and_then(|table| table.remove(&id)))
    }
}
