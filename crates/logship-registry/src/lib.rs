//! Schema registry: deterministic name⇄ID derivation, a persistent `sled`
//! cache, and the rebuild-and-wait protocol receivers use on a cache miss.
//!
//! The ID is a pure function of the name (`hex(SHA-256(name))`), so the
//! cache is strictly an optimization — rebuild exists to recover from a
//! wiped or desynced cache when the backing database still exists (spec
//! §4.1, §9 "Schema cache as derivable data").

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

const SCHEMAS_TREE: &str = "schemas";
const REBUILD_POLL_INTERVAL: Duration = Duration::from_millis(10);
const REBUILD_POLL_ATTEMPTS: u32 = 10; // 10 * 10ms = 100ms bound

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("persistent cache error: {0}")]
    Cache(#[from] sled::Error),
    #[error("catalog error: {0}")]
    Catalog(anyhow::Error),
}

/// The columnar store operations the registry needs: create-database-if-
/// absent and list-all-databases (for cache rebuild). Implemented by
/// `logship-store`'s `ColumnarWriter`; kept as a trait here so the registry
/// doesn't depend on the store crate (dependency inversion, teacher's
/// "globals -> injected state" pattern applied at the crate boundary).
#[async_trait::async_trait]
pub trait DatabaseCatalog: Send + Sync {
    async fn ensure_database(&self, name: &str) -> anyhow::Result<()>;
    async fn list_databases(&self) -> anyhow::Result<Vec<String>>;
}

/// Pure function: `schemaID = hex(SHA-256(schemaName))`. Total, deterministic,
/// and the registry never stores a pair that contradicts it (spec invariant 1).
pub fn derive_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SchemaRegistry {
    cache: sled::Tree,
    catalog: Arc<dyn DatabaseCatalog>,
}

impl SchemaRegistry {
    pub fn open(db: &sled::Db, catalog: Arc<dyn DatabaseCatalog>) -> Result<Self, RegistryError> {
        let cache = db.open_tree(SCHEMAS_TREE)?;
        Ok(Self { cache, catalog })
    }

    /// Ensure the columnar database named `name` exists, cache `(name, id)`
    /// idempotently, and return the derived ID. Fails only on an underlying
    /// store or cache error.
    pub async fn get_or_create_schema(&self, name: &str) -> Result<String, RegistryError> {
        self.catalog
            .ensure_database(name)
            .await
            .map_err(RegistryError::Catalog)?;

        let id = derive_id(name);
        self.cache.insert(id.as_bytes(), name.as_bytes())?;
        Ok(id)
    }

    /// Persistent reverse lookup. `Ok(None)` is a plain cache miss, not an error.
    pub fn name_by_id(&self, id: &str) -> Result<Option<String>, RegistryError> {
        match self.cache.get(id.as_bytes())? {
            Some(ivec) => Ok(Some(String::from_utf8_lossy(&ivec).into_owned())),
            None => Ok(None),
        }
    }

    /// List every database in the columnar store, recompute `derive_id` for
    /// each, and cache the first binding whose derived ID matches `id`.
    /// Fire-and-forget: failures are logged, never propagated, by design —
    /// callers use [`SchemaRegistry::rebuild_and_wait`] to observe the
    /// outcome instead.
    pub fn rebuild_cache_async(self: &Arc<Self>, id: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let databases = match this.catalog.list_databases().await {
                Ok(dbs) => dbs,
                Err(err) => {
                    tracing::error!(%id, error = %err, "schema cache rebuild: failed to list databases");
                    return;
                }
            };

            for db_name in databases {
                if derive_id(&db_name) == id {
                    if let Err(err) = this.cache.insert(id.as_bytes(), db_name.as_bytes()) {
                        tracing::error!(%id, error = %err, "schema cache rebuild: failed to persist binding");
                    } else {
                        tracing::info!(%id, schema = %db_name, "schema cache rebuilt");
                    }
                    return;
                }
            }
            tracing::warn!(%id, "schema cache rebuild: no matching database found");
        });
    }

    /// The rebuild-and-wait protocol (spec §4.1): on a cache miss, trigger a
    /// rebuild once, then poll every 10ms for up to 100ms. Returns the
    /// resolved name, or `None` if it is still missing after the bound.
    pub async fn rebuild_and_wait(self: &Arc<Self>, id: &str) -> Result<Option<String>, RegistryError> {
        if let Some(name) = self.name_by_id(id)? {
            return Ok(Some(name));
        }

        self.rebuild_cache_async(id.to_string());

        for _ in 0..REBUILD_POLL_ATTEMPTS {
            tokio::time::sleep(REBUILD_POLL_INTERVAL).await;
            if let Some(name) = self.name_by_id(id)? {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Removes a cached binding without touching the upstream database, to
    /// simulate a wiped or desynced cache in scenario tests.
    #[cfg(feature = "testkit")]
    pub fn forget_binding_for_test(&self, id: &str) -> Result<(), RegistryError> {
        self.cache.remove(id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeCatalog {
        databases: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DatabaseCatalog for FakeCatalog {
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

    fn open_registry(dir: &tempfile::TempDir) -> (Arc<SchemaRegistry>, Arc<FakeCatalog>) {
        let db = sled::open(dir.path()).unwrap();
        let catalog = Arc::new(FakeCatalog {
            databases: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(SchemaRegistry::open(&db, catalog.clone()).unwrap());
        (registry, catalog)
    }

    #[test]
    fn derive_id_is_pure_and_deterministic() {
        assert_eq!(derive_id("login"), derive_id("login"));
        assert_ne!(derive_id("login"), derive_id("action"));
        // Known SHA-256("login") hex digest.
        assert_eq!(
            derive_id("login"),
            "428821350e9691491f616b754cd8315fb86d797ab35d843479e732ef90665324"
        );
    }

    #[tokio::test]
    async fn get_or_create_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _catalog) = open_registry(&dir);

        let id = registry.get_or_create_schema("app1").await.unwrap();
        assert_eq!(id, derive_id("app1"));

        let name = registry.name_by_id(&id).unwrap();
        assert_eq!(name.as_deref(), Some("app1"));
    }

    #[tokio::test]
    async fn miss_on_unknown_id_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _catalog) = open_registry(&dir);
        assert_eq!(registry.name_by_id("not-an-id").unwrap(), None);
    }

    #[tokio::test]
    async fn rebuild_and_wait_recovers_from_wiped_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, catalog) = open_registry(&dir);

        let id = registry.get_or_create_schema("app1").await.unwrap();
        // Simulate a wiped cache: database still exists upstream, binding gone.
        registry.cache.remove(id.as_bytes()).unwrap();
        assert_eq!(registry.name_by_id(&id).unwrap(), None);
        assert_eq!(catalog.databases.lock().unwrap().len(), 1);

        let recovered = registry.rebuild_and_wait(&id).await.unwrap();
        assert_eq!(recovered.as_deref(), Some("app1"));
    }

    #[tokio::test]
    async fn rebuild_and_wait_gives_up_on_persistent_miss() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _catalog) = open_registry(&dir);
        let result = registry.rebuild_and_wait(&derive_id("never-created")).await.unwrap();
        assert_eq!(result, None);
    }
}
