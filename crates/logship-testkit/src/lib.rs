//! Shared fixtures for scenario tests that span a mutex/buffer/async
//! boundary: a tempdir-backed schema registry and an in-memory fake
//! catalog/sink, so `tests/scenario_*.rs` files never need a live
//! ClickHouse server (SPEC_FULL §8).

use std::sync::{Arc, Mutex};

use logship_ingest::Sink;
use logship_model::LogRecord;
use logship_registry::{DatabaseCatalog, SchemaRegistry};

/// An in-memory stand-in for the columnar store: records every batch handed
/// to it and tracks which "databases" have been created, without touching
/// the network.
#[derive(Default)]
pub struct FakeStore {
    databases: Mutex<Vec<String>>,
    batches: Mutex<Vec<Vec<LogRecord>>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn committed_records(&self) -> Vec<LogRecord> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.iter().cloned())
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl DatabaseCatalog for FakeStore {
    async fn ensure_database(&self, name: &str) -> anyhow::Result<()> {
        let mut dbs = self.databases.lock().unwrap();
        if !dbs.iter().any(|d| d == name) {
            dbs.push(name.to_string());
        }
        Ok(())
    }

    async fn list_databases(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.databases.lock().unwrap().clone())
    }
}

#[async_trait::async_trait]
impl Sink<LogRecord> for FakeStore {
    async fn insert_batch(&self, items: Vec<LogRecord>) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(items);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<LogRecord> for Arc<FakeStore> {
    async fn insert_batch(&self, items: Vec<LogRecord>) -> anyhow::Result<()> {
        FakeStore::insert_batch(self, items).await
    }
}

/// Opens a `SchemaRegistry` backed by a fresh temp-dir `sled` database and a
/// `FakeStore` catalog. The `TempDir` must be kept alive by the caller for
/// the registry's lifetime.
pub fn test_registry() -> (tempfile::TempDir, Arc<SchemaRegistry>, Arc<FakeStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = sled::open(dir.path()).expect("open sled db");
    let store = FakeStore::new();
    let registry = Arc::new(
        SchemaRegistry::open(&db, store.clone() as Arc<dyn DatabaseCatalog>).expect("open registry"),
    );
    (dir, registry, store)
}
