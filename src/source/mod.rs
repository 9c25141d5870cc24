//! Relational row sources.
//!
//! A [`RowSource`] is the engine's only view of the relational store:
//!
//! - a forward-only cursor yielding live primary keys in ascending order,
//! - single-row hydration by key (optionally bypassing caches and including
//!   soft-deleted rows),
//! - dependent-key lookup by foreign-key column,
//! - deletion of rows reached through a cascade,
//! - a per-connection cache flush.
//!
//! Implementations:
//!
//! - **[`sqlite`]**: `rusqlite`-backed table source with keyset paging.
//! - **[`memory`]**: ordered in-memory rows, for tests and fixtures.
//!
//! Mutation notifications live in [`events`].

pub mod events;
pub mod memory;
pub mod sqlite;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use events::{MutationEvent, MutationHub, MutationKind, MutationListener};
pub use memory::MemoryRowSource;
pub use sqlite::{SqliteRowSource, SqliteTable};

/// A row's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl RowKey {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowKey::Int(i) => Some(*i),
            RowKey::Text(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RowKey::Int(_) => "integer",
            RowKey::Text(_) => "string",
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(i) => write!(f, "{i}"),
            RowKey::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        RowKey::Int(value)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey::Text(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown column \"{0}\"")]
    UnknownColumn(String),

    #[error("{0}")]
    Other(String),
}

/// Options for [`RowSource::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateOptions {
    /// Read through to the store even if a cached row exists.
    pub bypass_cache: bool,
    /// Return soft-deleted rows too.
    pub include_deleted: bool,
}

impl HydrateOptions {
    /// Fresh read that also sees soft-deleted rows, as sync requires.
    pub fn for_sync() -> Self {
        Self {
            bypass_cache: true,
            include_deleted: true,
        }
    }

    /// Fresh read of live rows only.
    pub fn fresh() -> Self {
        Self {
            bypass_cache: true,
            include_deleted: false,
        }
    }
}

/// Forward-only stream of primary keys in ascending order.
pub type KeyCursor<'a> = Box<dyn Iterator<Item = Result<RowKey, SourceError>> + 'a>;

pub trait RowSource: Send + Sync {
    /// Stream the primary key of every live row, ascending, projecting nothing else.
    fn key_cursor(&self) -> Result<KeyCursor<'_>, SourceError>;

    /// Load one row as a JSON object; `None` when it does not exist.
    fn hydrate(&self, key: &RowKey, options: HydrateOptions) -> Result<Option<Value>, SourceError>;

    /// Keys of live rows whose `column` equals `value`, ascending.
    fn keys_where(&self, column: &str, value: &RowKey) -> Result<Vec<RowKey>, SourceError>;

    /// Delete rows reached through a cascade; returns how many were removed.
    fn delete_many(&self, keys: &[RowKey]) -> Result<usize, SourceError>;

    /// Drop any per-connection read cache.
    fn flush_cache(&self) {}
}
