use pkg_constants::state::EVENT_LOG_CAPACITY;
use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StoreError;
use crate::watch::{EventLog, EventType};

/// What a compare-and-mutate decision wants done with the key.
#[derive(Debug)]
pub enum Mutation {
    Put(Vec<u8>),
    Delete,
}

/// Persistent state store backed by SlateDB.
///
/// Every mutation is recorded in `event_log`. Writes are serialized through a
/// single lock so that [`StateStore::compare_and_mutate`] observes and
/// replaces a value atomically.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    pub event_log: EventLog,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Backend(format!("failed to create data directory {}: {}", path, e))
        })?;

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(path).map_err(|e| {
                StoreError::Backend(format!("failed to create local object store: {}", e))
            })?);
        Self::open(object_store).await
    }

    /// Open a throwaway store over an in-memory object store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Self::open(object_store).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> Result<Self, StoreError> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to open SlateDB: {}", e)))?;
        Ok(Self {
            db,
            event_log: EventLog::new(EVENT_LOG_CAPACITY),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.put_locked(key, value).await
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("SlateDB get failed: {}", e))),
        }
    }

    /// Delete a key from the store.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.delete_locked(key).await
    }

    /// Read the current value of `key` and apply the mutation `decide` returns,
    /// with no other write interleaving between the read and the write.
    /// An error from `decide` aborts without writing.
    pub async fn compare_and_mutate<F>(&self, key: &str, decide: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<&[u8]>) -> Result<Mutation, StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.get(key).await?;
        match decide(current.as_deref())? {
            Mutation::Put(value) => self.put_locked(key, &value).await,
            Mutation::Delete => self.delete_locked(key).await,
        }
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB scan_prefix failed: {}", e)))?;

        while let Some(kv) = iter
            .next()
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB scan failed: {}", e)))?
        {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> Result<(), StoreError> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB close failed: {}", e)))
    }

    async fn put_locked(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB put failed: {}", e)))?;
        self.event_log
            .emit(EventType::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    async fn delete_locked(&self, key: &str) -> Result<(), StoreError> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(format!("SlateDB delete failed: {}", e)))?;
        self.event_log
            .emit(EventType::Delete, key.to_string(), None)
            .await;
        Ok(())
    }
}
