//! Bulk re-population of indices from their row sources.
//!
//! Warm walks each target index's bound source in ascending key order and
//! writes one document per row through [`SyncEngine::sync_row`]. Rows are
//! fault-isolated: a failing row is recorded as a [`WarmItemError`] and the
//! walk continues. An `offset`/`limit` window makes long backfills resumable.
//!
//! Memory stays bounded: the cursor streams keys, rows are hydrated one at a
//! time, and the source cache is flushed after every row.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::reason_from_message;
use crate::probe::AvailabilityProbe;
use crate::registry::IndexRegistry;
use crate::source::RowKey;
use crate::sync::{RowOutcome, SyncEngine};

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("search backend is not available")]
    Unavailable,

    #[error("index \"{0}\" is not registered")]
    UnknownIndex(String),
}

/// Rows `[offset, offset + limit)` of each index, counted in key order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmWindow {
    pub offset: usize,
    /// `None` walks to the end of the source.
    pub limit: Option<usize>,
}

impl WarmWindow {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    fn is_empty(&self) -> bool {
        self.limit == Some(0)
    }
}

/// Shared flag checked between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarmRequest {
    /// Indexes to warm; `None` means every discovered index.
    pub indexes: Option<Vec<String>>,
    pub window: WarmWindow,
    pub cancel: Option<CancelToken>,
}

impl WarmRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn indexes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn window(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.window = WarmWindow::new(offset, limit);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmItemError {
    pub id: RowKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexWarmReport {
    pub index: String,
    pub attempted: usize,
    pub succeeded: usize,
    /// Rows that vanished (or were soft-deleted) between the scan and the read.
    pub missing: usize,
    pub failures: Vec<WarmItemError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// Set when the key cursor failed and the walk ended early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_error: Option<String>,
}

impl IndexWarmReport {
    fn new(index: &str) -> Self {
        Self {
            index: index.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cursor_error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub indexes: Vec<IndexWarmReport>,
    pub cancelled: bool,
}

impl WarmReport {
    pub fn is_success(&self) -> bool {
        self.indexes.iter().all(IndexWarmReport::is_success)
    }

    pub fn attempted(&self) -> usize {
        self.indexes.iter().map(|i| i.attempted).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.indexes.iter().map(|i| i.failures.len()).sum()
    }

    /// No index was targeted or no row fell inside the window.
    pub fn is_nothing_to_do(&self) -> bool {
        self.attempted() == 0 && self.is_success()
    }

    pub fn index(&self, name: &str) -> Option<&IndexWarmReport> {
        self.indexes.iter().find(|i| i.index == name)
    }
}

/// Receives warm events as they happen.
pub trait WarmProgress {
    fn index_started(&mut self, _index: &str) {}

    fn row_finished(&mut self, _index: &str, _id: &RowKey, _error: Option<&WarmItemError>) {}

    fn index_finished(&mut self, _report: &IndexWarmReport) {}
}

/// Discards all progress events.
pub struct NoProgress;

impl WarmProgress for NoProgress {}

pub struct Warmer {
    registry: Arc<IndexRegistry>,
    engine: Arc<SyncEngine>,
    probe: AvailabilityProbe,
}

impl Warmer {
    pub fn new(registry: Arc<IndexRegistry>, engine: Arc<SyncEngine>, probe: AvailabilityProbe) -> Self {
        Self {
            registry,
            engine,
            probe,
        }
    }

    pub fn warm(
        &self,
        request: &WarmRequest,
        progress: &mut dyn WarmProgress,
    ) -> Result<WarmReport, WarmError> {
        if !self.probe.is_available(None) {
            warn!("search backend is not available");
            return Err(WarmError::Unavailable);
        }
        let targets = match &request.indexes {
            Some(names) => {
                if let Some(unknown) = names.iter().find(|n| self.registry.index(n).is_none()) {
                    return Err(WarmError::UnknownIndex(unknown.clone()));
                }
                names.clone()
            }
            None => self.registry.index_names(),
        };

        let mut report = WarmReport::default();
        for index in &targets {
            if request.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                report.cancelled = true;
                break;
            }
            progress.index_started(index);
            let (section, cancelled) = self.warm_index(index, request, progress);
            progress.index_finished(&section);
            report.indexes.push(section);
            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            warn!(attempted = report.attempted(), "warm cancelled");
        } else if report.is_nothing_to_do() {
            info!("nothing to do");
        } else {
            info!(
                attempted = report.attempted(),
                failures = report.failure_count(),
                "warm finished"
            );
        }
        Ok(report)
    }

    fn warm_index(
        &self,
        index: &str,
        request: &WarmRequest,
        progress: &mut dyn WarmProgress,
    ) -> (IndexWarmReport, bool) {
        let mut section = IndexWarmReport::new(index);
        let Some(entity) = self.engine.entity_for_index(index) else {
            info!(index, "no source bound; skipping");
            section.skipped = Some("no source bound".to_string());
            return (section, false);
        };
        let window = request.window;
        if window.is_empty() {
            return (section, false);
        }
        let source = entity.source();
        let cursor = match source.key_cursor() {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(index, error = %e, "could not open key cursor");
                section.cursor_error = Some(e.to_string());
                return (section, false);
            }
        };

        info!(index, offset = window.offset, limit = ?window.limit, "warming");
        let mut cancelled = false;
        for (position, key) in cursor.enumerate() {
            if position < window.offset {
                if let Err(e) = key {
                    warn!(index, error = %e, "key cursor failed");
                    section.cursor_error = Some(e.to_string());
                    break;
                }
                continue;
            }
            if window.limit.is_some_and(|limit| section.attempted >= limit) {
                break;
            }
            if request.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                cancelled = true;
                break;
            }
            let key = match key {
                Ok(key) => key,
                Err(e) => {
                    warn!(index, error = %e, "key cursor failed");
                    section.cursor_error = Some(e.to_string());
                    break;
                }
            };

            section.attempted += 1;
            match self.engine.sync_row(entity.name(), &key) {
                Ok(RowOutcome::Indexed) => {
                    section.succeeded += 1;
                    progress.row_finished(index, &key, None);
                }
                Ok(RowOutcome::Missing) => {
                    section.missing += 1;
                    progress.row_finished(index, &key, None);
                }
                Err(e) => {
                    let failure = WarmItemError {
                        id: key.clone(),
                        reason: reason_from_message(&e.reason()),
                    };
                    debug!(index, id = %key, reason = %failure.reason, "row failed");
                    progress.row_finished(index, &key, Some(&failure));
                    section.failures.push(failure);
                }
            }
            source.flush_cache();
        }

        if !section.failures.is_empty() {
            warn!(
                index,
                failures = section.failures.len(),
                attempted = section.attempted,
                "index warmed with failures"
            );
        }
        (section, cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::registry::IndexDefinition;
    use crate::source::MemoryRowSource;
    use crate::sync::SyncedEntity;
    use serde_json::json;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        source: Arc<MemoryRowSource>,
        warmer: Warmer,
    }

    fn fixture(rows: i64) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let source = Arc::new(MemoryRowSource::with_rows(
            (1..=rows).map(|i| (RowKey::Int(i), json!({"id": i}))),
        ));
        let registry = IndexRegistry::builder()
            .index(IndexDefinition::new("listing", json!({}), json!({})))
            .index(IndexDefinition::new("unbound", json!({}), json!({})))
            .build();
        let engine = SyncEngine::builder(backend.clone())
            .entity(SyncedEntity::new("listing", source.clone()))
            .build()
            .unwrap();
        let warmer = Warmer::new(
            Arc::new(registry),
            Arc::new(engine),
            AvailabilityProbe::with_default_timeout(backend.clone()),
        );
        Fixture {
            backend,
            source,
            warmer,
        }
    }

    #[test]
    fn unbound_index_is_skipped() {
        let fx = fixture(2);
        let report = fx.warmer.warm(&WarmRequest::all(), &mut NoProgress).unwrap();
        let unbound = report.index("unbound").unwrap();
        assert_eq!(unbound.skipped.as_deref(), Some("no source bound"));
        assert_eq!(report.index("listing").unwrap().succeeded, 2);
        assert!(report.is_success());
    }

    #[test]
    fn unknown_index_is_rejected() {
        let fx = fixture(1);
        let err = fx
            .warmer
            .warm(&WarmRequest::all().indexes(["ghost"]), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, WarmError::UnknownIndex(n) if n == "ghost"));
    }

    #[test]
    fn unavailable_backend_fails_fast() {
        let fx = fixture(1);
        fx.backend.set_reachable(false);
        let err = fx.warmer.warm(&WarmRequest::all(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, WarmError::Unavailable));
    }

    #[test]
    fn cache_is_flushed_after_every_row() {
        let fx = fixture(4);
        fx.warmer
            .warm(&WarmRequest::all().indexes(["listing"]), &mut NoProgress)
            .unwrap();
        assert_eq!(fx.source.flush_count(), 4);
    }

    #[test]
    fn zero_limit_is_nothing_to_do() {
        let fx = fixture(3);
        let report = fx
            .warmer
            .warm(&WarmRequest::all().indexes(["listing"]).window(0, Some(0)), &mut NoProgress)
            .unwrap();
        assert!(report.is_nothing_to_do());
        assert!(fx.backend.indexed_ids("listing").is_empty());
    }

    struct CancelAfter {
        token: CancelToken,
        after: usize,
        seen: usize,
    }

    impl WarmProgress for CancelAfter {
        fn row_finished(&mut self, _index: &str, _id: &RowKey, _error: Option<&WarmItemError>) {
            self.seen += 1;
            if self.seen == self.after {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn cancellation_stops_between_rows() {
        let fx = fixture(10);
        let token = CancelToken::new();
        let mut progress = CancelAfter {
            token: token.clone(),
            after: 3,
            seen: 0,
        };
        let report = fx
            .warmer
            .warm(&WarmRequest::all().cancel_token(token), &mut progress)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(fx.backend.indexed_ids("listing"), vec!["1", "2", "3"]);
        // Nothing after the cancelled index is visited.
        assert!(report.index("unbound").is_none());
    }
}
