//! Service-facing status and cluster statistics.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::probe::AvailabilityProbe;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("search backend is not available")]
    Unavailable,

    #[error("could not read cluster stats: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub label: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster_name: Option<String>,
    pub status: Option<String>,
    pub metrics: Vec<Metric>,
}

/// Curated metrics, in display order.
const METRICS: &[(&str, &str)] = &[
    ("Nodes", "/nodes/count/total"),
    ("Indices", "/indices/count"),
    ("Index size (bytes)", "/indices/store/size_in_bytes"),
    ("Shards", "/indices/shards/total"),
    ("Documents", "/indices/docs/count"),
    ("Segments", "/indices/segments/count"),
];

impl ClusterStats {
    pub fn from_response(raw: &Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            cluster_name: text("cluster_name"),
            status: text("status"),
            metrics: METRICS
                .iter()
                .filter_map(|&(label, pointer)| {
                    raw.pointer(pointer)
                        .and_then(Value::as_u64)
                        .map(|value| Metric { label, value })
                })
                .collect(),
        }
    }

    pub fn metric(&self, label: &str) -> Option<u64> {
        self.metrics.iter().find(|m| m.label == label).map(|m| m.value)
    }
}

pub struct ServiceApi {
    backend: Arc<dyn Backend>,
    probe: AvailabilityProbe,
}

impl ServiceApi {
    pub fn new(backend: Arc<dyn Backend>, probe: AvailabilityProbe) -> Self {
        Self { backend, probe }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_available: self.probe.is_available(None),
        }
    }

    pub fn stats(&self) -> Result<ClusterStats, StatsError> {
        if !self.probe.is_available(None) {
            return Err(StatsError::Unavailable);
        }
        let raw = self.backend.cluster_stats()?;
        Ok(ClusterStats::from_response(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn api(backend: &Arc<MemoryBackend>) -> ServiceApi {
        ServiceApi::new(
            backend.clone(),
            AvailabilityProbe::with_default_timeout(backend.clone()),
        )
    }

    #[test]
    fn metrics_follow_display_order_and_skip_missing() {
        let stats = ClusterStats::from_response(&json!({
            "cluster_name": "c1",
            "status": "yellow",
            "indices": {"count": 3, "docs": {"count": 40}},
            "nodes": {"count": {"total": 2}},
        }));
        let labels: Vec<_> = stats.metrics.iter().map(|m| m.label).collect();
        assert_eq!(labels, vec!["Nodes", "Indices", "Documents"]);
        assert_eq!(stats.metric("Documents"), Some(40));
        assert_eq!(stats.status.as_deref(), Some("yellow"));
    }

    #[test]
    fn unavailable_backend_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_reachable(false);
        let api = api(&backend);
        assert!(!api.connection_status().is_available);
        assert!(matches!(api.stats(), Err(StatsError::Unavailable)));
    }

    #[test]
    fn stats_from_reachable_backend() {
        let backend = Arc::new(MemoryBackend::new());
        backend.create_index("a", &json!({})).unwrap();
        let stats = api(&backend).stats().unwrap();
        assert_eq!(stats.cluster_name.as_deref(), Some("memory"));
        assert_eq!(stats.metric("Indices"), Some(1));
        assert_eq!(stats.metrics.len(), 6);
    }
}
