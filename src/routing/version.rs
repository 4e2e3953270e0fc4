//! # Versions
//!
//! Immutable numbered snapshots of a function plus its mutable `$LATEST`
//! working copy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::{RoutingError, RoutingResult};
use crate::observability::{log_event_with_fields, Event};

/// Name of the unpublished working copy
pub const LATEST: &str = "$LATEST";

/// Immutable published snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub function_name: String,

    /// Starts at 1, strictly increasing per function
    pub version_id: u64,

    pub code_ref: String,

    pub config_ref: String,

    /// SHA-256 of `code_ref` at publish time
    pub code_sha256: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
}

/// Mutable working copy of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub function_name: String,
    pub code_ref: String,
    pub config_ref: String,
    pub updated_at: DateTime<Utc>,
}

/// Version qualifier as written by callers: `$LATEST` or a version number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    Latest,
    Version(u64),
}

impl FromStr for Qualifier {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LATEST {
            return Ok(Qualifier::Latest);
        }
        match s.parse::<u64>() {
            Ok(0) | Err(_) => Err(RoutingError::InvalidArgument(format!(
                "Invalid version qualifier: '{}'",
                s
            ))),
            Ok(n) => Ok(Qualifier::Version(n)),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Latest => f.write_str(LATEST),
            Qualifier::Version(n) => write!(f, "{}", n),
        }
    }
}

/// Persisted form of one function's versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub latest: LatestPointer,
    pub versions: Vec<Version>,
    /// Next id handed out by publish; ids are never reused
    pub next_version: u64,
}

#[derive(Debug)]
struct VersionEntry {
    version: Arc<Version>,
    alias_refs: u32,
}

#[derive(Debug)]
struct FunctionVersions {
    latest: LatestPointer,
    versions: BTreeMap<u64, VersionEntry>,
    next_version: u64,
}

type FunctionSlot = Arc<Mutex<FunctionVersions>>;

/// Registry of functions, their versions and `$LATEST` pointers
///
/// Each function sits behind its own mutex; the outer map is only
/// write-locked when functions are created.
#[derive(Debug, Default)]
pub struct VersionStore {
    functions: RwLock<HashMap<String, FunctionSlot>>,
}

fn code_digest(code_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_ref.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl VersionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function with its initial `$LATEST` contents
    pub fn create_function(
        &self,
        name: &str,
        code_ref: &str,
        config_ref: &str,
    ) -> RoutingResult<LatestPointer> {
        if name.trim().is_empty() {
            return Err(RoutingError::InvalidArgument(
                "Function name must not be empty".into(),
            ));
        }

        let latest = LatestPointer {
            function_name: name.to_string(),
            code_ref: code_ref.to_string(),
            config_ref: config_ref.to_string(),
            updated_at: Utc::now(),
        };

        {
            let mut functions = self.functions.write().map_err(|_| RoutingError::poisoned())?;
            if functions.contains_key(name) {
                return Err(RoutingError::Conflict(format!(
                    "Function already exists: {}",
                    name
                )));
            }
            functions.insert(
                name.to_string(),
                Arc::new(Mutex::new(FunctionVersions {
                    latest: latest.clone(),
                    versions: BTreeMap::new(),
                    next_version: 1,
                })),
            );
        }

        log_event_with_fields(Event::FunctionCreated, &[("function", name)]);
        Ok(latest)
    }

    fn slot(&self, name: &str) -> RoutingResult<FunctionSlot> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        functions
            .get(name)
            .cloned()
            .ok_or_else(|| RoutingError::NotFound(format!("Function not found: {}", name)))
    }

    /// Check that a function is registered
    pub fn contains_function(&self, name: &str) -> RoutingResult<bool> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        Ok(functions.contains_key(name))
    }

    /// Snapshot `$LATEST` as a new immutable version
    pub fn publish(&self, name: &str, description: &str) -> RoutingResult<Version> {
        let slot = self.slot(name)?;
        let version = {
            let mut state = slot.lock().map_err(|_| RoutingError::poisoned())?;
            let version_id = state.next_version;
            let version = Version {
                function_name: name.to_string(),
                version_id,
                code_ref: state.latest.code_ref.clone(),
                config_ref: state.latest.config_ref.clone(),
                code_sha256: code_digest(&state.latest.code_ref),
                description: description.to_string(),
                created_at: Utc::now(),
            };
            state.next_version += 1;
            state.versions.insert(
                version_id,
                VersionEntry {
                    version: Arc::new(version.clone()),
                    alias_refs: 0,
                },
            );
            version
        };

        let id = version.version_id.to_string();
        log_event_with_fields(
            Event::VersionPublished,
            &[("function", name), ("version", &id)],
        );
        Ok(version)
    }

    /// Get a published version
    pub fn get(&self, name: &str, version_id: u64) -> RoutingResult<Version> {
        self.get_shared(name, version_id).map(|v| (*v).clone())
    }

    pub(crate) fn get_shared(&self, name: &str, version_id: u64) -> RoutingResult<Arc<Version>> {
        let slot = self.slot(name)?;
        let state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        state
            .versions
            .get(&version_id)
            .map(|entry| Arc::clone(&entry.version))
            .ok_or_else(|| {
                RoutingError::NotFound(format!("Version not found: {}:{}", name, version_id))
            })
    }

    /// Current `$LATEST` contents
    pub fn latest(&self, name: &str) -> RoutingResult<LatestPointer> {
        let slot = self.slot(name)?;
        let state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        Ok(state.latest.clone())
    }

    /// Overwrite `$LATEST`; published versions are unaffected
    pub fn update_latest(
        &self,
        name: &str,
        code_ref: &str,
        config_ref: &str,
    ) -> RoutingResult<LatestPointer> {
        let slot = self.slot(name)?;
        let mut state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        state.latest.code_ref = code_ref.to_string();
        state.latest.config_ref = config_ref.to_string();
        state.latest.updated_at = Utc::now();
        Ok(state.latest.clone())
    }

    /// Delete a published version that no alias references
    pub fn delete(&self, name: &str, qualifier: Qualifier) -> RoutingResult<()> {
        let version_id = match qualifier {
            Qualifier::Latest => {
                return Err(RoutingError::InvalidArgument(format!(
                    "{} cannot be deleted",
                    LATEST
                )))
            }
            Qualifier::Version(n) => n,
        };

        let slot = self.slot(name)?;
        {
            let mut state = slot.lock().map_err(|_| RoutingError::poisoned())?;
            let entry = state.versions.get(&version_id).ok_or_else(|| {
                RoutingError::NotFound(format!("Version not found: {}:{}", name, version_id))
            })?;
            if entry.alias_refs > 0 {
                return Err(RoutingError::Conflict(format!(
                    "Version {}:{} is referenced by {} alias(es)",
                    name, version_id, entry.alias_refs
                )));
            }
            state.versions.remove(&version_id);
        }

        let id = version_id.to_string();
        log_event_with_fields(Event::VersionDeleted, &[("function", name), ("version", &id)]);
        Ok(())
    }

    /// Published versions in ascending id order
    pub fn list_versions(&self, name: &str) -> RoutingResult<Vec<Version>> {
        let slot = self.slot(name)?;
        let state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        Ok(state.versions.values().map(|e| (*e.version).clone()).collect())
    }

    /// Registered function names, sorted
    pub fn list_functions(&self) -> RoutingResult<Vec<String>> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        let mut names: Vec<String> = functions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Take an alias reference on every id, or on none of them
    pub(crate) fn pin(&self, name: &str, ids: &[u64]) -> RoutingResult<()> {
        let slot = self.slot(name)?;
        let mut state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        if let Some(missing) = ids.iter().find(|id| !state.versions.contains_key(*id)) {
            return Err(RoutingError::NotFound(format!(
                "Version not found: {}:{}",
                name, missing
            )));
        }
        for id in ids {
            if let Some(entry) = state.versions.get_mut(id) {
                entry.alias_refs += 1;
            }
        }
        Ok(())
    }

    pub(crate) fn unpin(&self, name: &str, ids: &[u64]) -> RoutingResult<()> {
        let slot = self.slot(name)?;
        let mut state = slot.lock().map_err(|_| RoutingError::poisoned())?;
        for id in ids {
            if let Some(entry) = state.versions.get_mut(id) {
                entry.alias_refs = entry.alias_refs.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Export every function for persistence
    pub fn export(&self) -> RoutingResult<Vec<FunctionRecord>> {
        let slots: Vec<FunctionSlot> = {
            let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
            functions.values().cloned().collect()
        };

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.lock().map_err(|_| RoutingError::poisoned())?;
            records.push(FunctionRecord {
                latest: state.latest.clone(),
                versions: state.versions.values().map(|e| (*e.version).clone()).collect(),
                next_version: state.next_version,
            });
        }
        records.sort_by(|a, b| a.latest.function_name.cmp(&b.latest.function_name));
        Ok(records)
    }

    /// Rebuild a store from persisted records
    ///
    /// Alias references start at zero; the alias table re-pins on restore.
    pub fn from_records(records: Vec<FunctionRecord>) -> RoutingResult<Self> {
        let mut functions = HashMap::with_capacity(records.len());
        for record in records {
            let name = record.latest.function_name.clone();
            let mut versions = BTreeMap::new();
            for version in record.versions {
                if version.function_name != name || version.version_id == 0 {
                    return Err(RoutingError::InvalidArgument(format!(
                        "Malformed version record {}:{} under function {}",
                        version.function_name, version.version_id, name
                    )));
                }
                if version.version_id >= record.next_version {
                    return Err(RoutingError::InvalidArgument(format!(
                        "Version {}:{} is not below next_version {}",
                        name, version.version_id, record.next_version
                    )));
                }
                versions.insert(
                    version.version_id,
                    VersionEntry {
                        version: Arc::new(version),
                        alias_refs: 0,
                    },
                );
            }
            let slot = FunctionVersions {
                latest: record.latest,
                versions,
                next_version: record.next_version.max(1),
            };
            if functions.insert(name.clone(), Arc::new(Mutex::new(slot))).is_some() {
                return Err(RoutingError::Conflict(format!(
                    "Duplicate function record: {}",
                    name
                )));
            }
        }
        Ok(Self {
            functions: RwLock::new(functions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(name: &str) -> VersionStore {
        let store = VersionStore::new();
        store.create_function(name, "s3://code/v1.zip", "mem=128").unwrap();
        store
    }

    #[test]
    fn test_publish_starts_at_one() {
        let store = store_with("orders");
        assert_eq!(store.publish("orders", "").unwrap().version_id, 1);
        assert_eq!(store.publish("orders", "").unwrap().version_id, 2);
    }

    #[test]
    fn test_publish_unknown_function() {
        let store = VersionStore::new();
        assert!(matches!(
            store.publish("ghost", ""),
            Err(RoutingError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_function() {
        let store = store_with("orders");
        assert!(matches!(
            store.create_function("orders", "a", "b"),
            Err(RoutingError::Conflict(_))
        ));
    }

    #[test]
    fn test_update_latest_leaves_versions_alone() {
        let store = store_with("orders");
        let v1 = store.publish("orders", "first").unwrap();

        store.update_latest("orders", "s3://code/v2.zip", "mem=256").unwrap();

        let fetched = store.get("orders", 1).unwrap();
        assert_eq!(fetched, v1);
        assert_eq!(store.latest("orders").unwrap().code_ref, "s3://code/v2.zip");
    }

    #[test]
    fn test_code_digest_recorded() {
        let store = store_with("orders");
        let v1 = store.publish("orders", "").unwrap();
        store.update_latest("orders", "s3://code/v2.zip", "mem=128").unwrap();
        let v2 = store.publish("orders", "").unwrap();

        assert_eq!(v1.code_sha256.len(), 64);
        assert_ne!(v1.code_sha256, v2.code_sha256);
    }

    #[test]
    fn test_delete_latest_rejected() {
        let store = store_with("orders");
        assert!(matches!(
            store.delete("orders", Qualifier::Latest),
            Err(RoutingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_pinned_version() {
        let store = store_with("orders");
        store.publish("orders", "").unwrap();
        store.pin("orders", &[1]).unwrap();

        assert!(matches!(
            store.delete("orders", Qualifier::Version(1)),
            Err(RoutingError::Conflict(_))
        ));

        store.unpin("orders", &[1]).unwrap();
        store.delete("orders", Qualifier::Version(1)).unwrap();
        assert!(matches!(store.get("orders", 1), Err(RoutingError::NotFound(_))));
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let store = store_with("orders");
        store.publish("orders", "").unwrap();
        store.publish("orders", "").unwrap();
        store.delete("orders", Qualifier::Version(2)).unwrap();

        assert_eq!(store.publish("orders", "").unwrap().version_id, 3);
    }

    #[test]
    fn test_pin_is_all_or_nothing() {
        let store = store_with("orders");
        store.publish("orders", "").unwrap();

        assert!(store.pin("orders", &[1, 7]).is_err());
        // Version 1 must still be deletable
        store.delete("orders", Qualifier::Version(1)).unwrap();
    }

    #[test]
    fn test_qualifier_parse() {
        assert_eq!("$LATEST".parse::<Qualifier>().unwrap(), Qualifier::Latest);
        assert_eq!("12".parse::<Qualifier>().unwrap(), Qualifier::Version(12));
        assert!("0".parse::<Qualifier>().is_err());
        assert!("latest".parse::<Qualifier>().is_err());
        assert_eq!(Qualifier::Version(4).to_string(), "4");
    }

    #[test]
    fn test_export_and_restore() {
        let store = store_with("orders");
        store.publish("orders", "").unwrap();
        store.publish("orders", "").unwrap();
        store.delete("orders", Qualifier::Version(1)).unwrap();

        let records = store.export().unwrap();
        let restored = VersionStore::from_records(records).unwrap();

        assert_eq!(restored.list_versions("orders").unwrap().len(), 1);
        assert_eq!(restored.publish("orders", "").unwrap().version_id, 3);
    }
}
