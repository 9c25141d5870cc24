//! Ordered in-memory row source.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use super::{HydrateOptions, KeyCursor, RowKey, RowSource, SourceError};

#[derive(Debug, Clone)]
struct StoredRow {
    data: Value,
    deleted: bool,
}

/// Rows kept in key order. Deletes are soft, so restores can be exercised.
#[derive(Default)]
pub struct MemoryRowSource {
    rows: RwLock<BTreeMap<RowKey, StoredRow>>,
    hydrate_failures: RwLock<HashMap<RowKey, String>>,
    hydrations: AtomicUsize,
    flushes: AtomicUsize,
}

fn matches(value: Option<&Value>, key: &RowKey) -> bool {
    match (value, key) {
        (Some(Value::Number(n)), RowKey::Int(i)) => n.as_i64() == Some(*i),
        (Some(Value::String(s)), RowKey::Text(t)) => s == t,
        (Some(Value::String(s)), RowKey::Int(i)) => s.parse::<i64>().ok() == Some(*i),
        _ => false,
    }
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from `(key, row)` pairs.
    pub fn with_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (RowKey, Value)>,
    {
        let source = Self::new();
        for (key, data) in rows {
            source.insert(key, data);
        }
        source
    }

    pub fn insert(&self, key: impl Into<RowKey>, data: Value) {
        self.rows.write().insert(
            key.into(),
            StoredRow {
                data,
                deleted: false,
            },
        );
    }

    pub fn soft_delete(&self, key: &RowKey) -> bool {
        self.set_deleted(key, true)
    }

    pub fn restore(&self, key: &RowKey) -> bool {
        self.set_deleted(key, false)
    }

    fn set_deleted(&self, key: &RowKey, deleted: bool) -> bool {
        match self.rows.write().get_mut(key) {
            Some(row) => {
                row.deleted = deleted;
                true
            }
            None => false,
        }
    }

    pub fn is_deleted(&self, key: &RowKey) -> bool {
        self.rows.read().get(key).is_some_and(|r| r.deleted)
    }

    /// Make hydration of `key` fail with `reason`.
    pub fn fail_hydrate(&self, key: impl Into<RowKey>, reason: &str) {
        self.hydrate_failures
            .write()
            .insert(key.into(), reason.to_string());
    }

    pub fn hydration_count(&self) -> usize {
        self.hydrations.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl RowSource for MemoryRowSource {
    fn key_cursor(&self) -> Result<KeyCursor<'_>, SourceError> {
        // Snapshot of live keys at scan time.
        let keys: Vec<RowKey> = self
            .rows
            .read()
            .iter()
            .filter(|(_, row)| !row.deleted)
            .map(|(key, _)| key.clone())
            .collect();
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn hydrate(&self, key: &RowKey, options: HydrateOptions) -> Result<Option<Value>, SourceError> {
        self.hydrations.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = self.hydrate_failures.read().get(key) {
            return Err(SourceError::Other(reason.clone()));
        }
        Ok(self
            .rows
            .read()
            .get(key)
            .filter(|row| options.include_deleted || !row.deleted)
            .map(|row| row.data.clone()))
    }

    fn keys_where(&self, column: &str, value: &RowKey) -> Result<Vec<RowKey>, SourceError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|(_, row)| !row.deleted && matches(row.data.get(column), value))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn delete_many(&self, keys: &[RowKey]) -> Result<usize, SourceError> {
        Ok(keys.iter().filter(|k| self.soft_delete(k)).count())
    }

    fn flush_cache(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> MemoryRowSource {
        MemoryRowSource::with_rows([
            (RowKey::Int(3), json!({"id": 3, "parent_id": 1})),
            (RowKey::Int(1), json!({"id": 1, "parent_id": 9})),
            (RowKey::Int(2), json!({"id": 2, "parent_id": 1})),
        ])
    }

    #[test]
    fn cursor_is_ascending() {
        let src = source();
        let keys: Vec<RowKey> = src.key_cursor().unwrap().map(Result::unwrap).collect();
        assert_eq!(keys, vec![RowKey::Int(1), RowKey::Int(2), RowKey::Int(3)]);
    }

    #[test]
    fn soft_deleted_rows_need_include_deleted() {
        let src = source();
        src.soft_delete(&RowKey::Int(2));
        let keys: Vec<RowKey> = src.key_cursor().unwrap().map(Result::unwrap).collect();
        assert_eq!(keys, vec![RowKey::Int(1), RowKey::Int(3)]);
        assert!(src.hydrate(&RowKey::Int(2), HydrateOptions::default()).unwrap().is_none());
        assert!(src.hydrate(&RowKey::Int(2), HydrateOptions::for_sync()).unwrap().is_some());
    }

    #[test]
    fn keys_where_skips_deleted_rows() {
        let src = source();
        assert_eq!(
            src.keys_where("parent_id", &RowKey::Int(1)).unwrap(),
            vec![RowKey::Int(2), RowKey::Int(3)]
        );
        assert_eq!(src.delete_many(&[RowKey::Int(3)]).unwrap(), 1);
        assert_eq!(
            src.keys_where("parent_id", &RowKey::Int(1)).unwrap(),
            vec![RowKey::Int(2)]
        );
    }
}
