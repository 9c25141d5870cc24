//! Search backend capability.
//!
//! The engine never talks to a search cluster directly. Everything it needs is
//! expressed by the [`Backend`] trait, which is deliberately narrow:
//!
//! - **Indices**: create, delete, exists
//! - **Documents**: index (upsert), delete, existence probe
//! - **Search**: raw request/response bodies
//! - **Cluster**: stats
//! - **Ingest**: pipeline put/delete
//!
//! Implementations:
//!
//! - **[`http`]**: Elasticsearch-compatible REST client over blocking `reqwest`.
//! - **[`memory`]**: in-process backend for tests and dry runs.

pub mod http;
pub mod memory;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use http::{HttpBackend, HttpBackendConfig};
pub use memory::MemoryBackend;

/// Errors returned by a [`Backend`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// No node could be reached (connection refused, DNS failure, connect timeout).
    #[error("no node reachable: {0}")]
    NoNodes(String),

    /// The addressed index, document or pipeline does not exist.
    #[error("not found: {reason}")]
    NotFound { reason: String, body: Option<Value> },

    /// The backend answered with a structured failure.
    #[error("backend returned {status}: {reason}")]
    Status {
        status: u16,
        reason: String,
        body: Option<Value>,
    },

    /// The request could not be completed after a connection was made.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_no_nodes(&self) -> bool {
        matches!(self, BackendError::NoNodes(_))
    }

    /// Human-readable reason, preferring the structured `error.reason` field.
    pub fn reason(&self) -> String {
        match self {
            BackendError::NotFound { reason, body } | BackendError::Status { reason, body, .. } => {
                body.as_ref()
                    .and_then(error_reason)
                    .unwrap_or_else(|| reason.clone())
            }
            other => other.to_string(),
        }
    }

    /// Build an error from an HTTP status and a (possibly empty) body.
    pub fn from_status(status: u16, body: Option<Value>) -> Self {
        let reason = body
            .as_ref()
            .and_then(error_reason)
            .unwrap_or_else(|| "Could not determine reason".to_string());
        if status == 404 {
            BackendError::NotFound { reason, body }
        } else {
            BackendError::Status {
                status,
                reason,
                body,
            }
        }
    }
}

/// Extract `error.reason` from a structured error body.
///
/// Older clusters send `{"error": "text"}`; that string is used as-is.
pub fn error_reason(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                obj.get("root_cause")
                    .and_then(|rc| rc.get(0))
                    .and_then(|rc| rc.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
        _ => None,
    }
}

/// Reason text for an arbitrary error message.
///
/// If the message is itself a JSON error body its `error.reason` wins,
/// otherwise the raw text is returned.
pub fn reason_from_message(message: &str) -> String {
    serde_json::from_str::<Value>(message)
        .ok()
        .and_then(|v| error_reason(&v))
        .unwrap_or_else(|| message.to_string())
}

/// A search request addressed to one or more indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Comma-separated index list, or `_all`.
    pub index: String,
    pub body: Value,
}

/// Operations the engine needs from a search cluster.
///
/// Implementations must be safe to share between operations; the engine holds
/// them behind `Arc<dyn Backend>`.
pub trait Backend: Send + Sync {
    fn create_index(&self, name: &str, body: &Value) -> Result<(), BackendError>;

    fn delete_index(&self, name: &str) -> Result<(), BackendError>;

    fn index_exists(&self, name: &str) -> Result<bool, BackendError>;

    /// Upsert a document.
    fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<(), BackendError>;

    fn delete_document(&self, index: &str, id: &str) -> Result<(), BackendError>;

    /// Existence check for a single document.
    ///
    /// `timeout` bounds both connecting and reading.
    fn document_exists(&self, index: &str, id: &str, timeout: Duration)
    -> Result<bool, BackendError>;

    fn search(&self, request: &SearchRequest) -> Result<Value, BackendError>;

    fn cluster_stats(&self) -> Result<Value, BackendError>;

    fn put_pipeline(&self, id: &str, body: &Value) -> Result<(), BackendError>;

    fn delete_pipeline(&self, id: &str) -> Result<(), BackendError>;
}
