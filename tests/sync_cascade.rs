mod util;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use search_sync::backend::MemoryBackend;
use search_sync::source::{
    MemoryRowSource, MutationEvent, MutationHub, MutationKind, RowKey, SqliteRowSource, SqliteTable,
};
use search_sync::sync::{CascadeRule, SyncEngine, SyncError, SyncedEntity};
use serde_json::{Value, json};

fn rows(items: Vec<(i64, Value)>) -> Arc<MemoryRowSource> {
    Arc::new(MemoryRowSource::with_rows(
        items.into_iter().map(|(k, v)| (RowKey::Int(k), v)),
    ))
}

/// author 1 <- book 10, 11 <- chapter 100, 101, 110
fn chain(backend: &Arc<MemoryBackend>) -> SyncEngine {
    let authors = rows(vec![(1, json!({"name": "ann"}))]);
    let books = rows(vec![
        (10, json!({"author_id": 1})),
        (11, json!({"author_id": 1})),
        (12, json!({"author_id": 2})),
    ]);
    let chapters = rows(vec![
        (100, json!({"book_id": 10})),
        (101, json!({"book_id": 10})),
        (110, json!({"book_id": 11})),
    ]);
    SyncEngine::builder(backend.clone())
        .entity(
            SyncedEntity::new("author", authors)
                .cascade(CascadeRule::reindex("book", "author_id"))
                .cascade(CascadeRule::delete("book", "author_id")),
        )
        .entity(
            SyncedEntity::new("book", books)
                .cascade(CascadeRule::reindex("chapter", "book_id"))
                .cascade(CascadeRule::delete("chapter", "book_id")),
        )
        .entity(SyncedEntity::new("chapter", chapters))
        .build()
        .unwrap()
}

#[test]
fn reindex_cascade_reaches_every_dependent_once() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = chain(&backend);
    let summary = engine
        .sync("author", &RowKey::Int(1), MutationKind::Updated)
        .unwrap();
    assert_eq!(summary.indexed, 6);
    assert_eq!(backend.indexed_ids("author"), vec!["1"]);
    assert_eq!(backend.indexed_ids("book"), vec!["10", "11"]);
    assert_eq!(backend.indexed_ids("chapter"), vec!["100", "101", "110"]);
}

#[test]
fn delete_cascade_removes_documents_and_rows() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = chain(&backend);
    engine
        .sync("author", &RowKey::Int(1), MutationKind::Created)
        .unwrap();
    backend.clear_ops();

    let summary = engine
        .sync("author", &RowKey::Int(1), MutationKind::Deleted)
        .unwrap();
    assert_eq!(summary.deleted, 6);
    assert!(backend.document_ids("book").is_empty());
    assert!(backend.document_ids("chapter").is_empty());
    let books = engine.entity("book").unwrap().source();
    assert!(books.keys_where("author_id", &RowKey::Int(1)).unwrap().is_empty());
}

#[test]
fn diamond_dependencies_write_once() {
    let backend = Arc::new(MemoryBackend::new());
    let tags = rows(vec![(5, json!({"owner_id": 1, "listing_id": 1}))]);
    let engine = SyncEngine::builder(backend.clone())
        .entity(
            SyncedEntity::new("user", rows(vec![(1, json!({}))]))
                .cascade(CascadeRule::reindex("listing", "owner_id"))
                .cascade(CascadeRule::reindex("tag", "owner_id")),
        )
        .entity(
            SyncedEntity::new("listing", rows(vec![(1, json!({"owner_id": 1}))]))
                .cascade(CascadeRule::reindex("tag", "listing_id")),
        )
        .entity(SyncedEntity::new("tag", tags))
        .build()
        .unwrap();
    engine
        .sync("user", &RowKey::Int(1), MutationKind::Updated)
        .unwrap();
    assert_eq!(backend.indexed_ids("tag"), vec!["5"]);
}

#[test]
fn restored_rows_are_reindexed_even_if_soft_deleted_flag_lingers() {
    let backend = Arc::new(MemoryBackend::new());
    let source = rows(vec![(3, json!({"title": "back"}))]);
    source.soft_delete(&RowKey::Int(3));
    let engine = SyncEngine::builder(backend.clone())
        .entity(SyncedEntity::new("listing", source))
        .build()
        .unwrap();
    engine
        .sync("listing", &RowKey::Int(3), MutationKind::Restored)
        .unwrap();
    assert_eq!(backend.document("listing", "3"), Some(json!({"title": "back"})));
}

#[test]
fn non_integer_id_fails_validation_before_any_write() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = chain(&backend);
    let err = engine
        .sync("author", &RowKey::from("1"), MutationKind::Updated)
        .unwrap_err();
    match err {
        SyncError::Validation { entity, found, .. } => {
            assert_eq!(entity, "author");
            assert_eq!(found, "string");
        }
        other => panic!("unexpected {other}"),
    }
    assert!(backend.ops().is_empty());
}

#[test]
fn hub_propagates_backend_failure_to_the_writer() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_reachable(false);
    let engine = Arc::new(chain(&backend));
    let hub = MutationHub::new();
    hub.subscribe(engine);
    let err = hub
        .emit(&MutationEvent::new("chapter", MutationKind::Updated, 100_i64))
        .unwrap_err();
    let sync = err.downcast_ref::<SyncError>().unwrap();
    assert!(matches!(sync, SyncError::Backend { .. }));
}

#[test]
fn sqlite_cascade_delete_soft_deletes_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let db = util::listings_db(dir.path(), 9);
    let conn = Arc::new(Mutex::new(Connection::open(&db).unwrap()));
    conn.lock()
        .execute_batch(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO owners VALUES (0, 'zero'), (1, 'one'), (2, 'two');",
        )
        .unwrap();
    let owners = SqliteRowSource::new(conn.clone(), SqliteTable::new("owners")).unwrap();
    let listings = SqliteRowSource::new(
        conn.clone(),
        SqliteTable::new("listings").soft_delete("is_deleted"),
    )
    .unwrap();
    let backend = Arc::new(MemoryBackend::new());
    let engine = SyncEngine::builder(backend.clone())
        .entity(
            SyncedEntity::new("owner", Arc::new(owners))
                .cascade(CascadeRule::delete("listing", "owner_id")),
        )
        .entity(SyncedEntity::new("listing", Arc::new(listings)))
        .build()
        .unwrap();

    engine
        .sync("owner", &RowKey::Int(1), MutationKind::Deleted)
        .unwrap();
    let deleted: Vec<i64> = {
        let conn = conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM listings WHERE is_deleted = 1 ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    };
    assert_eq!(deleted, vec![1, 4, 7]);
}
