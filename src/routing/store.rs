//! # Routing Store
//!
//! Durable storage for versions, aliases and reservations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::alias::Alias;
use super::governor::ConcurrencyConfig;
use super::version::FunctionRecord;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access routing store {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Routing store is corrupt: {0}")]
    Corrupt(String),

    #[error("Routing store unavailable: {0}")]
    Unavailable(String),
}

/// Everything the router needs to come back after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingState {
    #[serde(default)]
    pub functions: Vec<FunctionRecord>,

    #[serde(default)]
    pub aliases: Vec<Alias>,

    pub concurrency: ConcurrencyConfig,
}

impl RoutingState {
    /// State with no functions and no reservations
    pub fn empty(account_pool_limit: u32) -> Self {
        Self {
            functions: Vec::new(),
            aliases: Vec::new(),
            concurrency: ConcurrencyConfig {
                account_pool_limit,
                reserved: Default::default(),
            },
        }
    }
}

/// Trait for durable routing state storage
pub trait RoutingStore: Send + Sync + std::fmt::Debug {
    /// Load the last saved state, if any
    fn load(&self) -> StoreResult<Option<RoutingState>>;

    /// Replace the saved state
    fn save(&self, state: &RoutingState) -> StoreResult<()>;
}

/// JSON file-based routing store
#[derive(Debug)]
pub struct FileRoutingStore {
    path: PathBuf,
}

impl FileRoutingStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RoutingStore for FileRoutingStore {
    fn load(&self) -> StoreResult<Option<RoutingState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, state: &RoutingState) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize state: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

/// In-memory routing store for testing
#[derive(Debug, Default)]
pub struct MemRoutingStore {
    state: RwLock<Option<RoutingState>>,
}

impl MemRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingStore for MemRoutingStore {
    fn load(&self) -> StoreResult<Option<RoutingState>> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| StoreError::Unavailable("Lock poisoned".into()))
    }

    fn save(&self, state: &RoutingState) -> StoreResult<()> {
        let mut slot = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("Lock poisoned".into()))?;
        *slot = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = FileRoutingStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileRoutingStore::new(dir.path().join("nested/state.json"));

        let mut state = RoutingState::empty(100);
        state.concurrency.reserved.insert("orders".into(), 5);
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_file_store_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileRoutingStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_mem_store() {
        let store = MemRoutingStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&RoutingState::empty(10)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().concurrency.account_pool_limit, 10);
    }
}
