//! Mutation notifications.
//!
//! Writers report committed mutations to a [`MutationHub`]; listeners such as
//! the sync engine subscribe to it. Delivery is synchronous and in
//! subscription order. The first listener error stops delivery and is returned
//! to the writer, so a failed sync surfaces inside the caller's commit path.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::RowKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
    Restored,
}

impl MutationKind {
    pub fn is_delete(self) -> bool {
        matches!(self, MutationKind::Deleted)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
        };
        f.write_str(s)
    }
}

/// A committed change to one row of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub entity: String,
    pub kind: MutationKind,
    pub id: RowKey,
}

impl MutationEvent {
    pub fn new(entity: impl Into<String>, kind: MutationKind, id: impl Into<RowKey>) -> Self {
        Self {
            entity: entity.into(),
            kind,
            id: id.into(),
        }
    }
}

pub trait MutationListener: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent) -> anyhow::Result<()>;
}

#[derive(Default, Clone)]
pub struct MutationHub {
    listeners: Arc<RwLock<Vec<Arc<dyn MutationListener>>>>,
}

impl MutationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn MutationListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every listener, stopping at the first error.
    pub fn emit(&self, event: &MutationEvent) -> anyhow::Result<()> {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_mutation(event)?;
        }
        Ok(())
    }
}
