//! Construction of the engine from configuration.
//!
//! Every component receives its collaborators through its constructor; `App`
//! owns the shared pieces and hands out ready-made services.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{Backend, HttpBackend};
use crate::config::{Config, IndexSection, SourceSection};
use crate::lifecycle::IndexLifecycleManager;
use crate::probe::AvailabilityProbe;
use crate::registry::IndexRegistry;
use crate::source::{MutationHub, RowKey, SqliteRowSource, SqliteTable};
use crate::stats::ServiceApi;
use crate::sync::{SyncEngine, SyncedEntity};
use crate::warm::Warmer;

pub struct App {
    config: Config,
    backend: Arc<dyn Backend>,
    registry: Arc<IndexRegistry>,
    engine: Arc<SyncEngine>,
    probe: AvailabilityProbe,
    hub: MutationHub,
}

fn open_database(path: &Path) -> Result<Arc<Mutex<Connection>>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Keep only `fields` of a row.
fn select_fields(fields: Vec<String>) -> impl Fn(&RowKey, Value) -> Value + Send + Sync + 'static {
    move |_: &RowKey, row: Value| match row {
        Value::Object(mut obj) => {
            obj.retain(|key, _| fields.iter().any(|f| f == key));
            Value::Object(obj)
        }
        other => other,
    }
}

fn bind_entity(
    conn: &Arc<Mutex<Connection>>,
    index: &IndexSection,
    source: &SourceSection,
) -> Result<SyncedEntity> {
    let mut table = SqliteTable::new(source.table.clone()).primary_key(source.primary_key.clone());
    if let Some(column) = &source.soft_delete_column {
        table = table.soft_delete(column.clone());
    }
    let rows = SqliteRowSource::new(conn.clone(), table)
        .with_context(|| format!("failed to bind table \"{}\" to index \"{}\"", source.table, index.name))?;
    let mut entity = SyncedEntity::new(index.name.clone(), Arc::new(rows));
    if let Some(fields) = &source.fields {
        entity = entity.projection(select_fields(fields.clone()));
    }
    Ok(entity)
}

/// Attach cascade rules whose target entity is bound; the rest are dropped.
fn attach_cascades(bound: Vec<(&IndexSection, SyncedEntity)>) -> Vec<SyncedEntity> {
    let names: BTreeSet<String> = bound.iter().map(|(_, entity)| entity.name().to_string()).collect();
    bound
        .into_iter()
        .map(|(index, mut entity)| {
            for rule in &index.cascade {
                if names.contains(&rule.entity) {
                    entity = entity.cascade(rule.clone());
                } else {
                    warn!(index = %index.name, target = %rule.entity, "cascade target has no bound source; rule dropped");
                }
            }
            entity
        })
        .collect()
}

impl App {
    /// Wire the HTTP backend and the configured database.
    pub fn from_config(config: Config) -> Result<Self> {
        let backend = HttpBackend::new(config.backend.http_config()).context("failed to build HTTP client")?;
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let registry = Arc::new(config.registry());
        let probe = AvailabilityProbe::new(backend.clone(), config.backend.probe_timeout());

        let mut builder = SyncEngine::builder(backend.clone());
        let bound: Vec<(&IndexSection, &SourceSection)> = config
            .indexes
            .iter()
            .filter_map(|index| index.source.as_ref().map(|source| (index, source)))
            .collect();
        if !bound.is_empty() {
            match config.database_path() {
                Some(path) => match open_database(&path) {
                    Ok(conn) => {
                        let mut entities = Vec::with_capacity(bound.len());
                        for (index, source) in bound {
                            match bind_entity(&conn, index, source) {
                                Ok(entity) => entities.push((index, entity)),
                                Err(e) => warn!(index = %index.name, error = %format!("{e:#}"), "source not bound"),
                            }
                        }
                        for entity in attach_cascades(entities) {
                            builder = builder.entity(entity);
                        }
                    }
                    Err(e) => warn!(error = %format!("{e:#}"), "no sources bound"),
                },
                None => warn!("indexes declare sources but no database path is configured"),
            }
        }
        let engine = Arc::new(builder.build().context("invalid cascade configuration")?);
        info!(
            indexes = registry.discover_indexes().len(),
            pipelines = registry.discover_pipelines().len(),
            entities = engine.entity_names().len(),
            "engine ready"
        );

        let hub = MutationHub::new();
        hub.subscribe(engine.clone());

        Ok(Self {
            config,
            backend,
            registry,
            engine,
            probe,
            hub,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn probe(&self) -> &AvailabilityProbe {
        &self.probe
    }

    /// Hub with the sync engine subscribed; writers emit committed mutations here.
    pub fn hub(&self) -> &MutationHub {
        &self.hub
    }

    pub fn lifecycle(&self) -> IndexLifecycleManager {
        IndexLifecycleManager::new(self.backend.clone(), self.registry.clone(), self.probe.clone())
    }

    pub fn warmer(&self) -> Warmer {
        Warmer::new(self.registry.clone(), self.engine.clone(), self.probe.clone())
    }

    pub fn service(&self) -> ServiceApi {
        ServiceApi::new(self.backend.clone(), self.probe.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::source::{MutationEvent, MutationKind};
    use serde_json::json;

    fn database(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("app.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE listings (id INTEGER PRIMARY KEY, title TEXT, secret TEXT);
             INSERT INTO listings VALUES (1, 'bike', 'x'), (2, 'car', 'y');",
        )
        .unwrap();
        path
    }

    fn config(db: &Path) -> Config {
        let text = format!(
            r#"
[database]
path = "{}"

[[index]]
name = "listing"
[index.source]
table = "listings"
fields = ["id", "title"]

[[index]]
name = "broken"
[index.source]
table = "missing_table"
"#,
            db.display()
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn configured_sources_are_bound_and_projected() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path());
        let backend = Arc::new(MemoryBackend::new());
        let app = App::with_backend(config(&db), backend.clone()).unwrap();

        assert!(app.engine().entity("listing").is_some());
        assert!(app.engine().entity("broken").is_none());

        app.hub()
            .emit(&MutationEvent::new("listing", MutationKind::Created, 1_i64))
            .unwrap();
        assert_eq!(
            backend.document("listing", "1"),
            Some(json!({"id": 1, "title": "bike"}))
        );
    }

    #[test]
    fn cascade_to_unbound_source_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path());
        let text = format!(
            r#"
[database]
path = "{}"

[[index]]
name = "listing"
[index.source]
table = "listings"
[[index.cascade]]
kind = "reindex"
entity = "photo"
column = "listing_id"

[[index]]
name = "photo"
[index.source]
table = "photos"
"#,
            db.display()
        );
        let backend = Arc::new(MemoryBackend::new());
        let app = App::with_backend(toml::from_str(&text).unwrap(), backend.clone()).unwrap();

        let listing = app.engine().entity("listing").unwrap();
        assert!(listing.cascades().is_empty());
        assert!(app.engine().entity("photo").is_none());
        assert!(app.service().connection_status().is_available);

        app.hub()
            .emit(&MutationEvent::new("listing", MutationKind::Updated, 2_i64))
            .unwrap();
        assert_eq!(backend.document_ids("listing"), vec!["2"]);
    }

    #[test]
    fn hub_surfaces_sync_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(dir.path());
        let app = App::with_backend(config(&db), Arc::new(MemoryBackend::new())).unwrap();
        let err = app
            .hub()
            .emit(&MutationEvent::new("listing", MutationKind::Updated, "abc"))
            .unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }
}
