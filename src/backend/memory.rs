//! In-process backend.
//!
//! Keeps indices, documents and pipelines in memory and records every write in
//! an operation log. Failures can be injected per document, per index and per
//! pipeline, and the whole backend can be made unreachable, which makes it the
//! workhorse of the test suite and of `--dry-run` style wiring.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::{Backend, BackendError, SearchRequest};

/// A write observed by the backend, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateIndex(String),
    DeleteIndex(String),
    IndexDocument { index: String, id: String },
    DeleteDocument { index: String, id: String },
    PutPipeline(String),
    DeletePipeline(String),
}

#[derive(Debug, Clone, Default)]
struct StoredIndex {
    definition: Value,
    docs: BTreeMap<String, Value>,
}

#[derive(Default)]
struct State {
    reachable: bool,
    indices: BTreeMap<String, StoredIndex>,
    pipelines: BTreeMap<String, Value>,
    ops: Vec<Op>,
    document_failures: HashMap<(String, String), String>,
    index_failures: HashMap<String, String>,
    pipeline_failures: HashMap<String, String>,
    probe_error: Option<fn() -> BackendError>,
}

pub struct MemoryBackend {
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn structured(status: u16, kind: &str, reason: impl Into<String>) -> BackendError {
    let reason = reason.into();
    BackendError::from_status(
        status,
        Some(json!({"error": {"type": kind, "reason": reason}, "status": status})),
    )
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                reachable: true,
                ..Default::default()
            }),
        }
    }

    /// Toggle reachability; an unreachable backend fails every call with `NoNodes`.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Make the sentinel existence probe return a specific error.
    pub fn set_probe_error(&self, make: Option<fn() -> BackendError>) {
        self.state.lock().probe_error = make;
    }

    /// Fail every write of document `id` in `index` with `reason`.
    pub fn fail_document(&self, index: &str, id: &str, reason: &str) {
        self.state
            .lock()
            .document_failures
            .insert((index.to_string(), id.to_string()), reason.to_string());
    }

    /// Fail creation of `index` with `reason`.
    pub fn fail_index_create(&self, index: &str, reason: &str) {
        self.state
            .lock()
            .index_failures
            .insert(index.to_string(), reason.to_string());
    }

    /// Fail puts of pipeline `id` with `reason`.
    pub fn fail_pipeline_put(&self, id: &str, reason: &str) {
        self.state
            .lock()
            .pipeline_failures
            .insert(id.to_string(), reason.to_string());
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().indices.keys().cloned().collect()
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        self.state.lock().pipelines.keys().cloned().collect()
    }

    /// The `{settings, mappings}` body an index was created with.
    pub fn index_definition(&self, index: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|i| i.definition.clone())
    }

    pub fn pipeline(&self, id: &str) -> Option<Value> {
        self.state.lock().pipelines.get(id).cloned()
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|i| i.docs.get(id).cloned())
    }

    /// Document ids stored in `index`, in id order.
    pub fn document_ids(&self, index: &str) -> Vec<String> {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|i| i.docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Ids of successful document writes to `index`, in call order.
    pub fn indexed_ids(&self, index: &str) -> Vec<String> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::IndexDocument { index: i, id } if i == index => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn guard(state: &State) -> Result<(), BackendError> {
        if state.reachable {
            Ok(())
        } else {
            Err(BackendError::NoNodes("memory backend marked unreachable".into()))
        }
    }
}

fn matches_text(source: &Value, query: &str) -> bool {
    let haystack = source.to_string().to_lowercase();
    query
        .replace('\\', "")
        .split_whitespace()
        .all(|term| haystack.contains(&term.to_lowercase()))
}

impl Backend for MemoryBackend {
    fn create_index(&self, name: &str, body: &Value) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        if let Some(reason) = state.index_failures.get(name) {
            return Err(structured(400, "illegal_argument_exception", reason.clone()));
        }
        if state.indices.contains_key(name) {
            return Err(structured(
                400,
                "resource_already_exists_exception",
                format!("index [{name}] already exists"),
            ));
        }
        state.indices.insert(
            name.to_string(),
            StoredIndex {
                definition: body.clone(),
                docs: BTreeMap::new(),
            },
        );
        state.ops.push(Op::CreateIndex(name.to_string()));
        Ok(())
    }

    fn delete_index(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        if state.indices.remove(name).is_none() {
            return Err(structured(
                404,
                "index_not_found_exception",
                format!("no such index [{name}]"),
            ));
        }
        state.ops.push(Op::DeleteIndex(name.to_string()));
        Ok(())
    }

    fn index_exists(&self, name: &str) -> Result<bool, BackendError> {
        let state = self.state.lock();
        Self::guard(&state)?;
        Ok(state.indices.contains_key(name))
    }

    fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        if let Some(reason) = state
            .document_failures
            .get(&(index.to_string(), id.to_string()))
        {
            return Err(structured(400, "document_parsing_exception", reason.clone()));
        }
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .docs
            .insert(id.to_string(), body.clone());
        state.ops.push(Op::IndexDocument {
            index: index.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    fn delete_document(&self, index: &str, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        let removed = state
            .indices
            .get_mut(index)
            .and_then(|i| i.docs.remove(id))
            .is_some();
        if !removed {
            return Err(BackendError::NotFound {
                reason: format!("document [{id}] missing from [{index}]"),
                body: Some(json!({"_index": index, "_id": id, "result": "not_found"})),
            });
        }
        state.ops.push(Op::DeleteDocument {
            index: index.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    fn document_exists(
        &self,
        index: &str,
        id: &str,
        _timeout: Duration,
    ) -> Result<bool, BackendError> {
        let state = self.state.lock();
        Self::guard(&state)?;
        if let Some(make) = state.probe_error {
            return Err(make());
        }
        match state.indices.get(index) {
            Some(i) => Ok(i.docs.contains_key(id)),
            None => Err(structured(
                404,
                "index_not_found_exception",
                format!("no such index [{index}]"),
            )),
        }
    }

    fn search(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        let state = self.state.lock();
        Self::guard(&state)?;

        let targets: Vec<&str> = if request.index == "_all" {
            state.indices.keys().map(String::as_str).collect()
        } else {
            request.index.split(',').collect()
        };

        let text = request
            .body
            .pointer("/query/query_string/query")
            .and_then(Value::as_str);

        let mut hits = Vec::new();
        for name in targets {
            let Some(index) = state.indices.get(name) else {
                return Err(structured(
                    404,
                    "index_not_found_exception",
                    format!("no such index [{name}]"),
                ));
            };
            for (id, source) in &index.docs {
                if text.is_none_or(|q| matches_text(source, q)) {
                    hits.push(json!({
                        "_index": name,
                        "_id": id,
                        "_score": 1.0,
                        "_source": source,
                    }));
                }
            }
        }

        let total = hits.len();
        let from = request.body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = request.body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let page: Vec<Value> = hits.into_iter().skip(from).take(size).collect();
        let max_score = if page.is_empty() { Value::Null } else { json!(1.0) };

        Ok(json!({
            "took": 0,
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {
                "total": {"value": total, "relation": "eq"},
                "max_score": max_score,
                "hits": page,
            }
        }))
    }

    fn cluster_stats(&self) -> Result<Value, BackendError> {
        let state = self.state.lock();
        Self::guard(&state)?;
        let docs: usize = state.indices.values().map(|i| i.docs.len()).sum();
        let bytes: usize = state
            .indices
            .values()
            .flat_map(|i| i.docs.values())
            .map(|d| d.to_string().len())
            .sum();
        Ok(json!({
            "cluster_name": "memory",
            "status": "green",
            "indices": {
                "count": state.indices.len(),
                "shards": {"total": state.indices.len()},
                "docs": {"count": docs},
                "store": {"size_in_bytes": bytes},
                "segments": {"count": state.indices.len()},
            },
            "nodes": {"count": {"total": 1, "data": 1}},
        }))
    }

    fn put_pipeline(&self, id: &str, body: &Value) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        if let Some(reason) = state.pipeline_failures.get(id) {
            return Err(structured(400, "parse_exception", reason.clone()));
        }
        state.pipelines.insert(id.to_string(), body.clone());
        state.ops.push(Op::PutPipeline(id.to_string()));
        Ok(())
    }

    fn delete_pipeline(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::guard(&state)?;
        if state.pipelines.remove(id).is_none() {
            return Err(structured(
                404,
                "resource_not_found_exception",
                format!("pipeline [{id}] is missing"),
            ));
        }
        state.ops.push(Op::DeletePipeline(id.to_string()));
        Ok(())
    }
}
