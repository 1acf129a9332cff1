//! StateStore: redb-backed container record persistence.
//!
//! All values are JSON-serialized into redb's `&[u8]` value column. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONTAINERS).map_err(map_err!(Backend))?;
        txn.commit().map_err(map_err!(Backend))?;
        Ok(())
    }

    /// Insert or replace a container record.
    pub fn put_container(&self, record: &ContainerRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Codec))?;
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Backend))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Backend))?;
        debug!(%key, "container record stored");
        Ok(())
    }

    /// Get a container record by ID.
    pub fn get_container(&self, id: &str) -> StateResult<Option<ContainerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Backend))?;
        match table.get(id).map_err(map_err!(Backend))? {
            Some(guard) => {
                let record: ContainerRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all container records.
    pub fn list_containers(&self) -> StateResult<Vec<ContainerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Backend))?;
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Backend))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Backend))? {
            let (_, value) = entry.map_err(map_err!(Backend))?;
            let record: ContainerRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
            results.push(record);
        }
        Ok(results)
    }

    /// List the container records owned by one node.
    pub fn list_containers_for_node(&self, node_id: &str) -> StateResult<Vec<ContainerRecord>> {
        Ok(self
            .list_containers()?
            .into_iter()
            .filter(|r| r.node_id == node_id)
            .collect())
    }

    /// Delete a container record. Returns true if it existed.
    pub fn delete_container(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Backend))?;
        let existed;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Backend))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Backend))?;
        debug!(%id, existed, "container record deleted");
        Ok(existed)
    }
}
