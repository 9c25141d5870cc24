//! Index and pipeline lifecycle: destroy, create, reset.
//!
//! Every operation first requires a reachable backend; after that it never
//! stops early. Each artifact is attempted and its outcome recorded in a
//! [`LifecycleReport`], so one bad index cannot hide the state of the others.
//!
//! Deleting something that does not exist counts as success
//! ([`OutcomeStatus::AlreadyAbsent`]), which makes `destroy` idempotent.
//!
//! # Concurrency
//!
//! Destroy and reset assume nothing else writes to the targeted indices while
//! they run. A writer racing the delete/create window can recreate an index
//! with dynamic mappings; operators should pause writers first.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{Backend, BackendError};
use crate::probe::AvailabilityProbe;
use crate::registry::IndexRegistry;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("search backend is not available")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Index,
    Pipeline,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => write!(f, "index"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Delete,
    Create,
    Put,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Create => write!(f, "create"),
            Self::Put => write!(f, "put"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Done,
    AlreadyAbsent,
    Failed(String),
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, OutcomeStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub artifact: Artifact,
    pub name: String,
    pub action: Action,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Ordered outcome of one lifecycle operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub items: Vec<ItemOutcome>,
}

impl LifecycleReport {
    pub fn is_success(&self) -> bool {
        self.items.iter().all(|i| i.status.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|i| !i.status.is_success())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, artifact: Artifact, name: &str, action: Action, status: OutcomeStatus) {
        match &status {
            OutcomeStatus::Failed(reason) => {
                warn!(%artifact, name, %action, reason = %reason, "lifecycle step failed")
            }
            _ => info!(%artifact, name, %action, ?status, "lifecycle step done"),
        }
        self.items.push(ItemOutcome {
            artifact,
            name: name.to_string(),
            action,
            status,
        });
    }

    fn extend(&mut self, other: LifecycleReport) {
        self.items.extend(other.items);
    }
}

fn delete_status(result: Result<(), BackendError>) -> OutcomeStatus {
    match result {
        Ok(()) => OutcomeStatus::Done,
        Err(e) if e.is_not_found() => OutcomeStatus::AlreadyAbsent,
        Err(e) => OutcomeStatus::Failed(e.reason()),
    }
}

fn write_status(result: Result<(), BackendError>) -> OutcomeStatus {
    match result {
        Ok(()) => OutcomeStatus::Done,
        Err(e) => OutcomeStatus::Failed(e.reason()),
    }
}

pub struct IndexLifecycleManager {
    backend: Arc<dyn Backend>,
    registry: Arc<IndexRegistry>,
    probe: AvailabilityProbe,
}

impl IndexLifecycleManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<IndexRegistry>,
        probe: AvailabilityProbe,
    ) -> Self {
        Self {
            backend,
            registry,
            probe,
        }
    }

    fn require_available(&self) -> Result<(), LifecycleError> {
        if self.probe.is_available(None) {
            Ok(())
        } else {
            warn!("search backend is not available");
            Err(LifecycleError::Unavailable)
        }
    }

    /// Delete indexes and pipelines; `None` means every discovered one.
    pub fn destroy(
        &self,
        indexes: Option<&[String]>,
        pipelines: Option<&[String]>,
    ) -> Result<LifecycleReport, LifecycleError> {
        self.require_available()?;
        let indexes = indexes
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.registry.index_names());
        let pipelines = pipelines
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.registry.pipeline_ids());
        Ok(self.destroy_items(&indexes, &pipelines))
    }

    fn destroy_items(&self, indexes: &[String], pipelines: &[String]) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for name in indexes {
            let status = delete_status(self.backend.delete_index(name));
            report.push(Artifact::Index, name, Action::Delete, status);
        }
        for id in pipelines {
            let status = delete_status(self.backend.delete_pipeline(id));
            report.push(Artifact::Pipeline, id, Action::Delete, status);
        }
        report
    }

    /// Create indexes and put pipelines; `None` means every discovered one.
    ///
    /// Names missing from the registry are recorded as failures.
    pub fn create(
        &self,
        indexes: Option<&[String]>,
        pipelines: Option<&[String]>,
    ) -> Result<LifecycleReport, LifecycleError> {
        self.require_available()?;
        let indexes = indexes
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.registry.index_names());
        let pipelines = pipelines
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.registry.pipeline_ids());
        Ok(self.create_items(&indexes, &pipelines))
    }

    fn create_items(&self, indexes: &[String], pipelines: &[String]) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for name in indexes {
            let status = match self.registry.index(name) {
                Some(def) => write_status(self.backend.create_index(name, &def.create_body())),
                None => OutcomeStatus::Failed("not registered".to_string()),
            };
            report.push(Artifact::Index, name, Action::Create, status);
        }
        for id in pipelines {
            let status = match self.registry.pipeline(id) {
                Some(def) => write_status(self.backend.put_pipeline(id, &def.put_body())),
                None => OutcomeStatus::Failed("not registered".to_string()),
            };
            report.push(Artifact::Pipeline, id, Action::Put, status);
        }
        report
    }

    /// Destroy and recreate every discovered index and pipeline.
    pub fn reset(&self) -> Result<LifecycleReport, LifecycleError> {
        self.require_available()?;
        let indexes = self.registry.index_names();
        let pipelines = self.registry.pipeline_ids();
        if indexes.is_empty() && pipelines.is_empty() {
            info!("no indexes or pipelines to reset");
            return Ok(LifecycleReport::default());
        }
        let mut report = self.destroy_items(&indexes, &pipelines);
        report.extend(self.create_items(&indexes, &pipelines));
        Ok(report)
    }
}
