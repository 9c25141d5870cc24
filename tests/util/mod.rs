use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use search_sync::backend::MemoryBackend;
use search_sync::probe::AvailabilityProbe;
use search_sync::registry::{IndexDefinition, IndexRegistry, PipelineDefinition};
use search_sync::source::{MemoryRowSource, RowKey};
use serde_json::json;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn unset(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// Rows `1..=n`, each `{"id": i, "title": "row i"}`.
#[allow(dead_code)]
pub fn numbered_rows(n: i64) -> Arc<MemoryRowSource> {
    Arc::new(MemoryRowSource::with_rows(
        (1..=n).map(|i| (RowKey::Int(i), json!({"id": i, "title": format!("row {i}")}))),
    ))
}

/// Registry with empty definitions for `indexes` and `pipelines`.
#[allow(dead_code)]
pub fn registry(indexes: &[&str], pipelines: &[&str]) -> Arc<IndexRegistry> {
    let mut builder = IndexRegistry::builder();
    for name in indexes {
        builder = builder.index(IndexDefinition::new(
            *name,
            json!({"number_of_shards": 1}),
            json!({"properties": {"title": {"type": "text"}}}),
        ));
    }
    for id in pipelines {
        builder = builder.pipeline(PipelineDefinition::new(*id, "test pipeline", vec![]));
    }
    Arc::new(builder.build())
}

#[allow(dead_code)]
pub fn probe(backend: &Arc<MemoryBackend>) -> AvailabilityProbe {
    AvailabilityProbe::with_default_timeout(backend.clone())
}

/// SQLite file with a `listings` table holding ids `1..=n`.
#[allow(dead_code)]
pub fn listings_db(dir: &Path, n: i64) -> PathBuf {
    let path = dir.join("listings.db");
    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE listings (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            owner_id INTEGER,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );",
    )
    .unwrap();
    let tx = conn.transaction().unwrap();
    for i in 1..=n {
        tx.execute(
            "INSERT INTO listings (id, title, owner_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![i, format!("listing {i}"), i % 3],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    path
}
