mod util;

use std::sync::Arc;

use search_sync::backend::{Backend, MemoryBackend};
use search_sync::lifecycle::{Action, Artifact, IndexLifecycleManager, LifecycleError, OutcomeStatus};
use serde_json::json;

fn manager(backend: &Arc<MemoryBackend>) -> IndexLifecycleManager {
    IndexLifecycleManager::new(
        backend.clone(),
        util::registry(&["listing", "category", "user"], &["strip-html"]),
        util::probe(backend),
    )
}

#[test]
fn destroy_twice_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = manager(&backend);
    lifecycle.create(None, None).unwrap();

    let first = lifecycle.destroy(None, None).unwrap();
    assert!(first.is_success());
    assert!(first.items.iter().all(|i| i.status == OutcomeStatus::Done));

    let second = lifecycle.destroy(None, None).unwrap();
    assert!(second.is_success());
    assert_eq!(second.items.len(), 4);
    assert!(
        second
            .items
            .iter()
            .all(|i| i.status == OutcomeStatus::AlreadyAbsent)
    );
    assert!(backend.index_names().is_empty());
    assert!(backend.pipeline_ids().is_empty());
}

#[test]
fn reset_leaves_exactly_the_discovered_set() {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_index("listing", &json!({"settings": {"stale": true}})).unwrap();
    let report = manager(&backend).reset().unwrap();
    assert!(report.is_success());

    assert_eq!(backend.index_names(), vec!["category", "listing", "user"]);
    assert_eq!(
        backend.index_definition("listing"),
        Some(json!({
            "settings": {"number_of_shards": 1},
            "mappings": {"properties": {"title": {"type": "text"}}},
        }))
    );
    assert_eq!(
        backend.pipeline("strip-html"),
        Some(json!({"description": "test pipeline", "processors": []}))
    );

    // Deletes come first, in sorted order, then creates.
    let steps: Vec<(Action, Artifact, &str)> = report
        .items
        .iter()
        .map(|i| (i.action, i.artifact, i.name.as_str()))
        .collect();
    assert_eq!(steps[0], (Action::Delete, Artifact::Index, "category"));
    assert_eq!(steps[3], (Action::Delete, Artifact::Pipeline, "strip-html"));
    assert_eq!(steps[4], (Action::Create, Artifact::Index, "category"));
    assert_eq!(steps[7], (Action::Put, Artifact::Pipeline, "strip-html"));
}

#[test]
fn failed_index_create_does_not_stop_reset() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_index_create("category", "unknown setting [index.foo]");
    let report = manager(&backend).reset().unwrap();
    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().map(|f| f.name.as_str()).collect();
    assert_eq!(failures, vec!["category"]);
    assert_eq!(backend.index_names(), vec!["listing", "user"]);
}

#[test]
fn scoped_destroy_leaves_other_artifacts() {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = manager(&backend);
    lifecycle.create(None, None).unwrap();
    let report = lifecycle
        .destroy(Some(&["user".to_string()]), Some(&[]))
        .unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(backend.index_names(), vec!["category", "listing"]);
    assert_eq!(backend.pipeline_ids(), vec!["strip-html"]);
}

#[test]
fn unreachable_backend_reports_unavailable() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_reachable(false);
    let lifecycle = manager(&backend);
    assert!(matches!(lifecycle.reset(), Err(LifecycleError::Unavailable)));
    assert!(matches!(
        lifecycle.create(None, None),
        Err(LifecycleError::Unavailable)
    ));
}
