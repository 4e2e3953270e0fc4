//! # Alias Table
//!
//! Named, mutable routing targets with an optional weighted secondary.
//! Routing snapshots live in an `ArcSwap` so `resolve` never blocks and
//! never observes a half-written update.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use super::errors::{RoutingError, RoutingResult};
use super::version::{VersionStore, LATEST};
use crate::observability::{log_event_with_fields, Event};

/// Routing configuration of one alias
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AliasRouting {
    pub primary_version_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_version_id: Option<u64>,

    /// Fraction of traffic sent to the secondary, in (0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_weight: Option<f64>,
}

impl AliasRouting {
    /// All traffic to one version
    pub fn single(primary_version_id: u64) -> Self {
        Self {
            primary_version_id,
            secondary_version_id: None,
            secondary_weight: None,
        }
    }

    /// Validate and build a routing configuration
    ///
    /// The secondary and its weight come together or not at all.
    pub fn from_parts(
        primary_version_id: u64,
        secondary_version_id: Option<u64>,
        secondary_weight: Option<f64>,
    ) -> RoutingResult<Self> {
        match (secondary_version_id, secondary_weight) {
            (None, None) => Ok(Self::single(primary_version_id)),
            (Some(_), None) => Err(RoutingError::InvalidArgument(
                "Secondary version given without a weight".into(),
            )),
            (None, Some(_)) => Err(RoutingError::InvalidArgument(
                "Weight given without a secondary version".into(),
            )),
            (Some(secondary), Some(weight)) => {
                if !(weight > 0.0 && weight <= 1.0) {
                    return Err(RoutingError::InvalidArgument(format!(
                        "Secondary weight must be in (0, 1], got {}",
                        weight
                    )));
                }
                if secondary == primary_version_id {
                    return Err(RoutingError::InvalidArgument(format!(
                        "Secondary version {} equals the primary",
                        secondary
                    )));
                }
                Ok(Self {
                    primary_version_id,
                    secondary_version_id: Some(secondary),
                    secondary_weight: Some(weight),
                })
            }
        }
    }

    /// The weighted secondary, if any
    pub fn split(&self) -> Option<(u64, f64)> {
        self.secondary_version_id.zip(self.secondary_weight)
    }

    /// Every version this routing references
    pub fn version_ids(&self) -> Vec<u64> {
        let mut ids = vec![self.primary_version_id];
        ids.extend(self.secondary_version_id);
        ids
    }
}

/// Persisted form of an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub function_name: String,
    pub alias_name: String,
    #[serde(flatten)]
    pub routing: AliasRouting,
}

#[derive(Debug)]
struct AliasEntry {
    routing: ArcSwap<AliasRouting>,
    /// Serializes writers; `true` once the alias has been deleted
    retired: Mutex<bool>,
}

type FunctionAliases = Arc<RwLock<BTreeMap<String, Arc<AliasEntry>>>>;

/// Aliases of every function
#[derive(Debug)]
pub struct AliasTable {
    versions: Arc<VersionStore>,
    functions: RwLock<HashMap<String, FunctionAliases>>,
}

fn validate_alias_name(alias: &str) -> RoutingResult<()> {
    if alias.trim().is_empty() {
        return Err(RoutingError::InvalidArgument(
            "Alias name must not be empty".into(),
        ));
    }
    if alias == LATEST || alias.chars().all(|c| c.is_ascii_digit()) {
        return Err(RoutingError::InvalidArgument(format!(
            "Alias name '{}' collides with a version qualifier",
            alias
        )));
    }
    Ok(())
}

impl AliasTable {
    /// Create an empty alias table over a version store
    pub fn new(versions: Arc<VersionStore>) -> Self {
        Self {
            versions,
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// The version store aliases point into
    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    fn function_aliases(&self, function: &str) -> RoutingResult<Option<FunctionAliases>> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        Ok(functions.get(function).cloned())
    }

    fn function_aliases_or_insert(&self, function: &str) -> RoutingResult<FunctionAliases> {
        if let Some(aliases) = self.function_aliases(function)? {
            return Ok(aliases);
        }
        let mut functions = self.functions.write().map_err(|_| RoutingError::poisoned())?;
        Ok(Arc::clone(functions.entry(function.to_string()).or_default()))
    }

    fn entry(&self, function: &str, alias: &str) -> RoutingResult<Arc<AliasEntry>> {
        let not_found = || RoutingError::NotFound(format!("Alias not found: {}:{}", function, alias));
        let aliases = self.function_aliases(function)?.ok_or_else(not_found)?;
        let aliases = aliases.read().map_err(|_| RoutingError::poisoned())?;
        aliases.get(alias).cloned().ok_or_else(not_found)
    }

    /// Create an alias sending all traffic to `primary_version_id`
    pub fn create_alias(
        &self,
        function: &str,
        alias: &str,
        primary_version_id: u64,
    ) -> RoutingResult<AliasRouting> {
        self.insert(function, alias, AliasRouting::single(primary_version_id))?;

        let version = primary_version_id.to_string();
        log_event_with_fields(
            Event::AliasCreated,
            &[("alias", alias), ("function", function), ("primary", &version)],
        );
        Ok(AliasRouting::single(primary_version_id))
    }

    fn insert(&self, function: &str, alias: &str, routing: AliasRouting) -> RoutingResult<()> {
        validate_alias_name(alias)?;
        if !self.versions.contains_function(function)? {
            return Err(RoutingError::NotFound(format!(
                "Function not found: {}",
                function
            )));
        }

        let aliases = self.function_aliases_or_insert(function)?;
        let mut aliases = aliases.write().map_err(|_| RoutingError::poisoned())?;
        if aliases.contains_key(alias) {
            return Err(RoutingError::Conflict(format!(
                "Alias already exists: {}:{}",
                function, alias
            )));
        }

        self.versions.pin(function, &routing.version_ids())?;
        aliases.insert(
            alias.to_string(),
            Arc::new(AliasEntry {
                routing: ArcSwap::from_pointee(routing),
                retired: Mutex::new(false),
            }),
        );
        Ok(())
    }

    /// Atomically replace an alias's routing configuration
    pub fn update_alias(
        &self,
        function: &str,
        alias: &str,
        primary_version_id: u64,
        secondary_version_id: Option<u64>,
        secondary_weight: Option<f64>,
    ) -> RoutingResult<AliasRouting> {
        let routing =
            AliasRouting::from_parts(primary_version_id, secondary_version_id, secondary_weight)?;
        let entry = self.entry(function, alias)?;

        {
            let retired = entry.retired.lock().map_err(|_| RoutingError::poisoned())?;
            if *retired {
                return Err(RoutingError::NotFound(format!(
                    "Alias not found: {}:{}",
                    function, alias
                )));
            }

            // Pin first so a failed validation leaves the old routing in place
            self.versions.pin(function, &routing.version_ids())?;
            let previous = entry.routing.swap(Arc::new(routing));
            self.versions.unpin(function, &previous.version_ids())?;
        }

        let primary = primary_version_id.to_string();
        let weight = secondary_weight.map(|w| w.to_string()).unwrap_or_default();
        log_event_with_fields(
            Event::AliasUpdated,
            &[
                ("alias", alias),
                ("function", function),
                ("primary", &primary),
                ("secondary_weight", &weight),
            ],
        );
        Ok(routing)
    }

    /// Current routing snapshot of an alias
    pub fn resolve(&self, function: &str, alias: &str) -> RoutingResult<AliasRouting> {
        let entry = self.entry(function, alias)?;
        let routing = **entry.routing.load();
        Ok(routing)
    }

    /// Remove an alias and release its version references
    pub fn delete_alias(&self, function: &str, alias: &str) -> RoutingResult<()> {
        let not_found =
            || RoutingError::NotFound(format!("Alias not found: {}:{}", function, alias));
        let removed = {
            let aliases = self.function_aliases(function)?.ok_or_else(not_found)?;
            let mut aliases = aliases.write().map_err(|_| RoutingError::poisoned())?;
            aliases.remove(alias)
        };
        let entry = removed.ok_or_else(not_found)?;

        {
            let mut retired = entry.retired.lock().map_err(|_| RoutingError::poisoned())?;
            *retired = true;
            self.versions
                .unpin(function, &entry.routing.load().version_ids())?;
        }

        log_event_with_fields(Event::AliasDeleted, &[("alias", alias), ("function", function)]);
        Ok(())
    }

    /// Aliases of one function, sorted by name
    pub fn list_aliases(&self, function: &str) -> RoutingResult<Vec<Alias>> {
        let Some(aliases) = self.function_aliases(function)? else {
            return Ok(Vec::new());
        };
        let aliases = aliases.read().map_err(|_| RoutingError::poisoned())?;
        Ok(aliases
            .iter()
            .map(|(name, entry)| Alias {
                function_name: function.to_string(),
                alias_name: name.clone(),
                routing: **entry.routing.load(),
            })
            .collect())
    }

    /// Export every alias for persistence
    pub fn export(&self) -> RoutingResult<Vec<Alias>> {
        let mut functions: Vec<String> = {
            let map = self.functions.read().map_err(|_| RoutingError::poisoned())?;
            map.keys().cloned().collect()
        };
        functions.sort();

        let mut all = Vec::new();
        for function in functions {
            all.extend(self.list_aliases(&function)?);
        }
        Ok(all)
    }

    /// Rebuild aliases, re-pinning every referenced version
    pub fn restore(versions: Arc<VersionStore>, aliases: Vec<Alias>) -> RoutingResult<Self> {
        let table = Self::new(versions);
        for alias in aliases {
            let routing = AliasRouting::from_parts(
                alias.routing.primary_version_id,
                alias.routing.secondary_version_id,
                alias.routing.secondary_weight,
            )?;
            table.insert(&alias.function_name, &alias.alias_name, routing)?;
        }
        Ok(table)
    }
}
