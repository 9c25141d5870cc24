//! Backend reachability probe.
//!
//! The probe asks for a fixed sentinel document. The answer itself is
//! irrelevant: any response, including "not found" or a rejected request,
//! proves a node answered. Only a "no node reachable" failure counts as
//! unavailable.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend::Backend;

/// Index addressed by the sentinel probe.
pub const SENTINEL_INDEX: &str = "test";

/// Document id addressed by the sentinel probe.
pub const SENTINEL_ID: &str = "test";

/// Timeout used when neither the caller nor configuration gives one.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AvailabilityProbe {
    backend: Arc<dyn Backend>,
    default_timeout: Duration,
}

impl AvailabilityProbe {
    pub fn new(backend: Arc<dyn Backend>, default_timeout: Duration) -> Self {
        Self {
            backend,
            default_timeout,
        }
    }

    pub fn with_default_timeout(backend: Arc<dyn Backend>) -> Self {
        Self::new(backend, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Whether a node answered within `timeout` (or the default timeout).
    pub fn is_available(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout);
        match self
            .backend
            .document_exists(SENTINEL_INDEX, SENTINEL_ID, timeout)
        {
            Ok(_) => true,
            Err(e) if e.is_no_nodes() => {
                debug!(error = %e, timeout_ms = timeout.as_millis() as u64, "backend unavailable");
                false
            }
            Err(e) => {
                debug!(error = %e, "backend answered the probe with an error");
                true
            }
        }
    }
}
