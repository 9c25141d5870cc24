//! `SQLite` table row source.
//!
//! Keys of live rows are streamed with keyset paging (`WHERE pk > last ORDER BY
//! pk LIMIT n`) so a scan holds at most one page of keys regardless of table
//! size, and no statement stays open between pages. Hydrated rows go through a small LRU
//! cache that sync reads bypass and warm flushes after every row.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params};
use serde_json::{Map, Value};
use tracing::debug;

use super::{HydrateOptions, KeyCursor, RowKey, RowSource, SourceError};

/// Keys fetched per cursor page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Rows kept in the hydration cache.
const CACHE_CAPACITY: usize = 256;

impl ToSql for RowKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            RowKey::Int(i) => ToSqlOutput::from(*i),
            RowKey::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

fn key_from_ref(value: ValueRef<'_>) -> Result<RowKey, SourceError> {
    match value {
        ValueRef::Integer(i) => Ok(RowKey::Int(i)),
        ValueRef::Text(t) => Ok(RowKey::Text(String::from_utf8_lossy(t).into_owned())),
        other => Err(SourceError::Other(format!(
            "unsupported primary key type {:?}",
            other.data_type()
        ))),
    }
}

fn json_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Which table a source reads and how its rows are keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteTable {
    pub table: String,
    pub primary_key: String,
    /// Truthy values mark a row as soft-deleted. `None` means hard deletes.
    pub soft_delete_column: Option<String>,
    pub page_size: usize,
}

impl SqliteTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            soft_delete_column: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }
}

pub struct SqliteRowSource {
    conn: Arc<Mutex<Connection>>,
    table: SqliteTable,
    columns: Vec<String>,
    cache: Mutex<LruCache<(RowKey, bool), Option<Value>>>,
}

impl SqliteRowSource {
    /// Open a database file and bind a source to one of its tables.
    pub fn open(path: &Path, table: SqliteTable) -> Result<Self, SourceError> {
        let conn = Connection::open(path)?;
        Self::new(Arc::new(Mutex::new(conn)), table)
    }

    /// Bind a source to a table on a shared connection.
    pub fn new(conn: Arc<Mutex<Connection>>, table: SqliteTable) -> Result<Self, SourceError> {
        let columns = table_columns(&conn.lock(), &table.table)?;
        if columns.is_empty() {
            return Err(SourceError::Other(format!(
                "table \"{}\" does not exist",
                table.table
            )));
        }
        for required in std::iter::once(&table.primary_key).chain(table.soft_delete_column.iter()) {
            if !columns.contains(required) {
                return Err(SourceError::UnknownColumn(required.clone()));
            }
        }
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            conn,
            table,
            columns,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn table(&self) -> &SqliteTable {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn live_filter(&self) -> String {
        match &self.table.soft_delete_column {
            Some(col) => format!(" AND ({0} IS NULL OR {0} = 0)", quote(col)),
            None => String::new(),
        }
    }

    fn fetch_page(&self, after: Option<&RowKey>) -> Result<Vec<RowKey>, SourceError> {
        let pk = quote(&self.table.primary_key);
        let table = quote(&self.table.table);
        let limit = self.table.page_size as i64;
        let live = self.live_filter();
        let conn = self.conn.lock();
        let mut keys = Vec::with_capacity(self.table.page_size);
        match after {
            Some(last) => {
                let sql = format!("SELECT {pk} FROM {table} WHERE {pk} > ?1{live} ORDER BY {pk} ASC LIMIT ?2");
                let mut stmt = conn.prepare_cached(&sql)?;
                let mut rows = stmt.query(params![last, limit])?;
                while let Some(row) = rows.next()? {
                    keys.push(key_from_ref(row.get_ref(0)?)?);
                }
            }
            None => {
                let sql = format!("SELECT {pk} FROM {table} WHERE {pk} IS NOT NULL{live} ORDER BY {pk} ASC LIMIT ?1");
                let mut stmt = conn.prepare_cached(&sql)?;
                let mut rows = stmt.query(params![limit])?;
                while let Some(row) = rows.next()? {
                    keys.push(key_from_ref(row.get_ref(0)?)?);
                }
            }
        }
        Ok(keys)
    }

    fn load_row(&self, key: &RowKey, include_deleted: bool) -> Result<Option<Value>, SourceError> {
        let filter = if include_deleted {
            String::new()
        } else {
            self.live_filter()
        };
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1{filter}",
            quote(&self.table.table),
            quote(&self.table.primary_key)
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(params![key])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut obj = Map::with_capacity(names.len());
        for (idx, name) in names.into_iter().enumerate() {
            obj.insert(name, json_from_ref(row.get_ref(idx)?));
        }
        Ok(Some(Value::Object(obj)))
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, SourceError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

struct KeysetCursor<'a> {
    source: &'a SqliteRowSource,
    buffer: VecDeque<RowKey>,
    last: Option<RowKey>,
    exhausted: bool,
}

impl Iterator for KeysetCursor<'_> {
    type Item = Result<RowKey, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.source.fetch_page(self.last.as_ref()) {
                Ok(page) => {
                    if page.len() < self.source.table.page_size {
                        self.exhausted = true;
                    }
                    debug!(table = %self.source.table.table, keys = page.len(), "fetched key page");
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let key = self.buffer.pop_front()?;
        self.last = Some(key.clone());
        Some(Ok(key))
    }
}

impl RowSource for SqliteRowSource {
    fn key_cursor(&self) -> Result<KeyCursor<'_>, SourceError> {
        Ok(Box::new(KeysetCursor {
            source: self,
            buffer: VecDeque::new(),
            last: None,
            exhausted: false,
        }))
    }

    fn hydrate(&self, key: &RowKey, options: HydrateOptions) -> Result<Option<Value>, SourceError> {
        let cache_key = (key.clone(), options.include_deleted);
        if !options.bypass_cache
            && let Some(hit) = self.cache.lock().get(&cache_key)
        {
            return Ok(hit.clone());
        }
        let row = self.load_row(key, options.include_deleted)?;
        self.cache.lock().put(cache_key, row.clone());
        Ok(row)
    }

    fn keys_where(&self, column: &str, value: &RowKey) -> Result<Vec<RowKey>, SourceError> {
        if !self.columns.iter().any(|c| c == column) {
            return Err(SourceError::UnknownColumn(column.to_string()));
        }
        let pk = quote(&self.table.primary_key);
        let sql = format!(
            "SELECT {pk} FROM {} WHERE {} = ?1{} ORDER BY {pk} ASC",
            quote(&self.table.table),
            quote(column),
            self.live_filter()
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![value])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(key_from_ref(row.get_ref(0)?)?);
        }
        Ok(keys)
    }

    fn delete_many(&self, keys: &[RowKey]) -> Result<usize, SourceError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let table = quote(&self.table.table);
        let pk = quote(&self.table.primary_key);
        let sql = match &self.table.soft_delete_column {
            Some(col) => format!("UPDATE {table} SET {} = 1 WHERE {pk} = ?1", quote(col)),
            None => format!("DELETE FROM {table} WHERE {pk} = ?1"),
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut affected = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for key in keys {
                affected += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        let mut cache = self.cache.lock();
        for key in keys {
            cache.pop(&(key.clone(), false));
            cache.pop(&(key.clone(), true));
        }
        Ok(affected)
    }

    fn flush_cache(&self) {
        self.cache.lock().clear();
        self.conn.lock().flush_prepared_statement_cache();
    }
}
