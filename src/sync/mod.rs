//! Inline index synchronization for row mutations.
//!
//! Each [`SyncedEntity`] binds a row source to an index and carries cascade
//! rules naming dependent entities. A mutation takes one of two paths:
//!
//! - **delete** (`Deleted`): remove the document, then for every delete rule
//!   remove the dependent rows from their source and run their delete path.
//! - **upsert** (`Created`, `Updated`, `Restored`): re-read the row (fresh,
//!   soft-deleted rows included), project it and upsert the document, then for
//!   every reindex rule run the dependents' upsert path.
//!
//! Errors propagate to the caller so a failed sync surfaces inside the write
//! that triggered it. Rule graphs with cycles are rejected when the engine is
//! built, and within one call each `(entity, id, path)` runs at most once.
//!
//! ```rust,ignore
//! let engine = SyncEngine::builder(backend)
//!     .entity(SyncedEntity::new("author", authors).cascade(CascadeRule::reindex("book", "author_id")))
//!     .entity(SyncedEntity::new("book", books))
//!     .build()?;
//! engine.sync("author", &RowKey::Int(7), MutationKind::Updated)?;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};
use crate::source::{
    HydrateOptions, MutationEvent, MutationKind, MutationListener, RowKey, RowSource, SourceError,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{entity} id must be an integer, got {found} \"{id}\"")]
    Validation {
        entity: String,
        id: String,
        found: &'static str,
    },

    #[error("unknown entity \"{0}\"")]
    UnknownEntity(String),

    #[error("cascade cycle: {}", .0.join(" -> "))]
    CascadeCycle(Vec<String>),

    #[error("failed to sync {entity} {id}: {source}")]
    Backend {
        entity: String,
        id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to read {entity} {id}: {source}")]
    Source {
        entity: String,
        id: String,
        #[source]
        source: SourceError,
    },
}

impl SyncError {
    /// Short reason for reports, preferring a backend's structured reason.
    pub fn reason(&self) -> String {
        match self {
            SyncError::Backend { source, .. } => source.reason(),
            SyncError::Source { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeKind {
    Delete,
    Reindex,
}

/// Propagation from an entity to the dependent rows that reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeRule {
    pub kind: CascadeKind,
    /// Dependent entity name.
    pub entity: String,
    /// Foreign-key column on the dependent source.
    pub column: String,
}

impl CascadeRule {
    pub fn delete(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            kind: CascadeKind::Delete,
            entity: entity.into(),
            column: column.into(),
        }
    }

    pub fn reindex(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            kind: CascadeKind::Reindex,
            entity: entity.into(),
            column: column.into(),
        }
    }
}

/// Turns a hydrated row into the document body.
pub type Projection = Arc<dyn Fn(&RowKey, Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct SyncedEntity {
    name: String,
    index: String,
    source: Arc<dyn RowSource>,
    projection: Option<Projection>,
    cascades: Vec<CascadeRule>,
}

impl fmt::Debug for SyncedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedEntity")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("cascades", &self.cascades)
            .finish_non_exhaustive()
    }
}

impl SyncedEntity {
    /// An entity indexed into an index of the same name.
    pub fn new(name: impl Into<String>, source: Arc<dyn RowSource>) -> Self {
        let name = name.into();
        Self {
            index: name.clone(),
            name,
            source,
            projection: None,
            cascades: Vec::new(),
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn projection<F>(mut self, project: F) -> Self
    where
        F: Fn(&RowKey, Value) -> Value + Send + Sync + 'static,
    {
        self.projection = Some(Arc::new(project));
        self
    }

    pub fn cascade(mut self, rule: CascadeRule) -> Self {
        self.cascades.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn source(&self) -> &Arc<dyn RowSource> {
        &self.source
    }

    pub fn cascades(&self) -> &[CascadeRule] {
        &self.cascades
    }

    fn document(&self, key: &RowKey, row: Value) -> Value {
        match &self.projection {
            Some(project) => project(key, row),
            None => row,
        }
    }
}

/// Writes performed by one sync call, cascades included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub indexed: usize,
    pub deleted: usize,
    /// Upserts skipped because the row no longer exists.
    pub missing: usize,
}

/// Result of writing one row during warm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Indexed,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Path {
    Delete,
    Upsert,
}

type Visited = HashSet<(String, RowKey, Path)>;

pub struct SyncEngineBuilder {
    backend: Arc<dyn Backend>,
    entities: BTreeMap<String, SyncedEntity>,
}

impl SyncEngineBuilder {
    /// Register an entity. A second entity with the same name is ignored.
    pub fn entity(mut self, entity: SyncedEntity) -> Self {
        if self.entities.contains_key(&entity.name) {
            warn!(entity = %entity.name, "duplicate entity registration skipped");
            return self;
        }
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Validate cascade targets and reject cyclic rule graphs.
    pub fn build(self) -> Result<SyncEngine, SyncError> {
        for entity in self.entities.values() {
            for rule in &entity.cascades {
                if !self.entities.contains_key(&rule.entity) {
                    return Err(SyncError::UnknownEntity(rule.entity.clone()));
                }
            }
        }
        if let Some(cycle) = find_cycle(&self.entities) {
            return Err(SyncError::CascadeCycle(cycle));
        }
        Ok(SyncEngine {
            backend: self.backend,
            entities: self.entities,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(entities: &BTreeMap<String, SyncedEntity>) -> Option<Vec<String>> {
    fn visit<'a>(
        name: &'a str,
        entities: &'a BTreeMap<String, SyncedEntity>,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        stack.push(name);
        if let Some(entity) = entities.get(name) {
            for rule in &entity.cascades {
                if let Some(cycle) = visit(&rule.entity, entities, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(name, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    entities
        .keys()
        .find_map(|name| visit(name, entities, &mut marks, &mut stack))
}

pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    entities: BTreeMap<String, SyncedEntity>,
}

impl SyncEngine {
    pub fn builder(backend: Arc<dyn Backend>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            backend,
            entities: BTreeMap::new(),
        }
    }

    pub fn entity(&self, name: &str) -> Option<&SyncedEntity> {
        self.entities.get(name)
    }

    /// The entity writing into `index`, if any.
    pub fn entity_for_index(&self, index: &str) -> Option<&SyncedEntity> {
        self.entities.values().find(|e| e.index == index)
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    fn lookup(&self, name: &str) -> Result<&SyncedEntity, SyncError> {
        self.entities
            .get(name)
            .ok_or_else(|| SyncError::UnknownEntity(name.to_string()))
    }

    pub fn handle(&self, event: &MutationEvent) -> Result<SyncSummary, SyncError> {
        self.sync(&event.entity, &event.id, event.kind)
    }

    /// Apply one committed mutation, cascades included.
    pub fn sync(&self, entity: &str, id: &RowKey, kind: MutationKind) -> Result<SyncSummary, SyncError> {
        let entity = self.lookup(entity)?;
        if id.as_int().is_none() {
            return Err(SyncError::Validation {
                entity: entity.name.clone(),
                id: id.to_string(),
                found: id.type_name(),
            });
        }
        debug!(entity = %entity.name, %id, %kind, "sync");
        let mut visited = Visited::new();
        let mut summary = SyncSummary::default();
        if kind.is_delete() {
            self.delete_path(entity, id, &mut visited, &mut summary)?;
        } else {
            self.upsert_path(entity, id, &mut visited, &mut summary)?;
        }
        Ok(summary)
    }

    /// Index one live row without cascading, bypassing the source cache.
    ///
    /// Used by warm, where no mutation happened and dependents are warmed on
    /// their own.
    pub fn sync_row(&self, entity: &str, id: &RowKey) -> Result<RowOutcome, SyncError> {
        let entity = self.lookup(entity)?;
        let indexed = self.write_document(entity, id, HydrateOptions::fresh())?;
        Ok(if indexed {
            RowOutcome::Indexed
        } else {
            RowOutcome::Missing
        })
    }

    fn write_document(
        &self,
        entity: &SyncedEntity,
        id: &RowKey,
        options: HydrateOptions,
    ) -> Result<bool, SyncError> {
        let row = entity
            .source
            .hydrate(id, options)
            .map_err(|source| SyncError::Source {
                entity: entity.name.clone(),
                id: id.to_string(),
                source,
            })?;
        let Some(row) = row else {
            debug!(entity = %entity.name, %id, "row no longer exists; skipping");
            return Ok(false);
        };
        let body = entity.document(id, row);
        self.backend
            .index_document(&entity.index, &id.to_string(), &body)
            .map_err(|source| SyncError::Backend {
                entity: entity.name.clone(),
                id: id.to_string(),
                source,
            })?;
        Ok(true)
    }

    fn dependents(
        &self,
        rule: &CascadeRule,
        id: &RowKey,
    ) -> Result<(&SyncedEntity, Vec<RowKey>), SyncError> {
        let dependent = self.lookup(&rule.entity)?;
        let keys = dependent
            .source
            .keys_where(&rule.column, id)
            .map_err(|source| SyncError::Source {
                entity: dependent.name.clone(),
                id: id.to_string(),
                source,
            })?;
        Ok((dependent, keys))
    }

    fn upsert_path(
        &self,
        entity: &SyncedEntity,
        id: &RowKey,
        visited: &mut Visited,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        if !visited.insert((entity.name.clone(), id.clone(), Path::Upsert)) {
            return Ok(());
        }
        if self.write_document(entity, id, HydrateOptions::for_sync())? {
            summary.indexed += 1;
        } else {
            summary.missing += 1;
        }
        for rule in entity.cascades.iter().filter(|r| r.kind == CascadeKind::Reindex) {
            let (dependent, keys) = self.dependents(rule, id)?;
            if !keys.is_empty() {
                info!(from = %entity.name, %id, to = %dependent.name, count = keys.len(), "cascading reindex");
            }
            for key in &keys {
                self.upsert_path(dependent, key, visited, summary)?;
            }
        }
        Ok(())
    }

    fn delete_path(
        &self,
        entity: &SyncedEntity,
        id: &RowKey,
        visited: &mut Visited,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        if !visited.insert((entity.name.clone(), id.clone(), Path::Delete)) {
            return Ok(());
        }
        match self.backend.delete_document(&entity.index, &id.to_string()) {
            Ok(()) => summary.deleted += 1,
            Err(e) if e.is_not_found() => {
                debug!(entity = %entity.name, %id, "document already absent");
            }
            Err(source) => {
                return Err(SyncError::Backend {
                    entity: entity.name.clone(),
                    id: id.to_string(),
                    source,
                });
            }
        }
        for rule in entity.cascades.iter().filter(|r| r.kind == CascadeKind::Delete) {
            let (dependent, keys) = self.dependents(rule, id)?;
            if keys.is_empty() {
                continue;
            }
            info!(from = %entity.name, %id, to = %dependent.name, count = keys.len(), "cascading delete");
            dependent
                .source
                .delete_many(&keys)
                .map_err(|source| SyncError::Source {
                    entity: dependent.name.clone(),
                    id: id.to_string(),
                    source,
                })?;
            for key in &keys {
                self.delete_path(dependent, key, visited, summary)?;
            }
        }
        Ok(())
    }
}

impl MutationListener for SyncEngine {
    fn on_mutation(&self, event: &MutationEvent) -> anyhow::Result<()> {
        self.handle(event)?;
        Ok(())
    }
}
