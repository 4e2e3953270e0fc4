//! # Concurrency Governor
//!
//! Admission control per function. Reserved functions draw from their own
//! ceiling; everything else shares what is left of the account pool after
//! reservations are carved out.
//!
//! Admission mode transitions:
//!
//! ```text
//! UNRESERVED --set(n>=1)--> RESERVED(n) --set(0)--> DISABLED
//! DISABLED --set(n>=1)--> RESERVED(n) --remove--> UNRESERVED
//! RESERVED(n) --set(m>=1)--> RESERVED(m)
//! ```
//!
//! Anything else, including disabling an already disabled function, fails
//! with `InvalidState`.
//!
//! Changing a limit never revokes permits already handed out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{RoutingError, RoutingResult};
use crate::observability::{log_event_with_fields, Event, RoutingMetrics};

/// Admission mode of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Shares the unreserved remainder of the account pool
    Unreserved,
    /// Dedicated ceiling of `n >= 1` concurrent invocations
    Reserved(u32),
    /// Reserved limit of zero; every attempt is throttled
    Disabled,
}

impl AdmissionMode {
    /// Capacity this mode carves out of the account pool
    pub fn reserved_limit(&self) -> Option<u32> {
        match self {
            AdmissionMode::Unreserved => None,
            AdmissionMode::Reserved(n) => Some(*n),
            AdmissionMode::Disabled => Some(0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionMode::Unreserved => "UNRESERVED",
            AdmissionMode::Reserved(_) => "RESERVED",
            AdmissionMode::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionMode::Reserved(n) => write!(f, "RESERVED({})", n),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Persisted concurrency settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub account_pool_limit: u32,

    /// Reserved limits by function; 0 means disabled
    #[serde(default)]
    pub reserved: BTreeMap<String, u32>,
}

#[derive(Debug)]
struct FunctionAdmission {
    mode: RwLock<AdmissionMode>,
    in_flight: AtomicU32,
}

impl FunctionAdmission {
    fn new(mode: AdmissionMode) -> Self {
        Self {
            mode: RwLock::new(mode),
            in_flight: AtomicU32::new(0),
        }
    }
}

/// One admitted in-flight invocation slot
///
/// Dropping an unreleased permit releases it, so cancelled work still
/// returns its slot.
#[derive(Debug)]
pub struct Permit {
    id: Uuid,
    function: String,
    slot: Arc<FunctionAdmission>,
    /// Set when the slot was drawn from the shared unreserved pool
    unreserved_pool: Option<Arc<AtomicU32>>,
    metrics: Arc<RoutingMetrics>,
    released: AtomicBool,
}

impl Permit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Return the slot to its pool
    ///
    /// A second call is a caller bug and fails with `InvalidState`.
    pub fn release(&self) -> RoutingResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(RoutingError::InvalidState(format!(
                "Permit {} for {} already released",
                self.id, self.function
            )));
        }

        self.slot.in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Some(pool) = &self.unreserved_pool {
            pool.fetch_sub(1, Ordering::AcqRel);
        }
        self.metrics.record_released(&self.function);
        Ok(())
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.is_released() {
            let _ = self.release();
        }
    }
}

/// Per-function admission control over a shared account pool
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    account_pool_limit: u32,
    functions: RwLock<HashMap<String, Arc<FunctionAdmission>>>,
    unreserved_in_flight: Arc<AtomicU32>,
    /// Sum of all reserved limits
    reserved_total: AtomicU32,
    /// Serializes reservation changes
    reservations: Mutex<()>,
    metrics: Arc<RoutingMetrics>,
}

impl ConcurrencyGovernor {
    /// Create a governor with every function unreserved
    pub fn new(account_pool_limit: u32, metrics: Arc<RoutingMetrics>) -> Self {
        Self {
            account_pool_limit,
            functions: RwLock::new(HashMap::new()),
            unreserved_in_flight: Arc::new(AtomicU32::new(0)),
            reserved_total: AtomicU32::new(0),
            reservations: Mutex::new(()),
            metrics,
        }
    }

    /// Rebuild a governor from persisted settings
    pub fn from_config(config: &ConcurrencyConfig, metrics: Arc<RoutingMetrics>) -> RoutingResult<Self> {
        let total: u64 = config.reserved.values().map(|n| u64::from(*n)).sum();
        if total > u64::from(config.account_pool_limit) {
            return Err(RoutingError::InvalidArgument(format!(
                "Reserved concurrency {} exceeds account pool {}",
                total, config.account_pool_limit
            )));
        }

        let functions: HashMap<String, Arc<FunctionAdmission>> = config
            .reserved
            .iter()
            .map(|(name, limit)| {
                let mode = if *limit == 0 {
                    AdmissionMode::Disabled
                } else {
                    AdmissionMode::Reserved(*limit)
                };
                (name.clone(), Arc::new(FunctionAdmission::new(mode)))
            })
            .collect();

        let governor = Self::new(config.account_pool_limit, metrics);
        governor.reserved_total.store(total as u32, Ordering::Release);
        *governor.functions.write().map_err(|_| RoutingError::poisoned())? = functions;
        Ok(governor)
    }

    fn slot(&self, function: &str) -> RoutingResult<Option<Arc<FunctionAdmission>>> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        Ok(functions.get(function).cloned())
    }

    fn slot_or_insert(&self, function: &str) -> RoutingResult<Arc<FunctionAdmission>> {
        if let Some(slot) = self.slot(function)? {
            return Ok(slot);
        }
        let mut functions = self.functions.write().map_err(|_| RoutingError::poisoned())?;
        Ok(Arc::clone(functions.entry(function.to_string()).or_insert_with(|| {
            Arc::new(FunctionAdmission::new(AdmissionMode::Unreserved))
        })))
    }

    /// Try to admit one invocation of `function`
    pub fn try_acquire(&self, function: &str) -> RoutingResult<Permit> {
        let slot = self.slot_or_insert(function)?;

        let unreserved_pool = {
            let mode = slot.mode.read().map_err(|_| RoutingError::poisoned())?;
            match *mode {
                AdmissionMode::Disabled => {
                    return Err(self.throttled(function, 0));
                }
                AdmissionMode::Reserved(limit) => {
                    slot.in_flight
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                            (n < limit).then_some(n + 1)
                        })
                        .map_err(|_| self.throttled(function, limit))?;
                    None
                }
                AdmissionMode::Unreserved => {
                    let capacity = self.unreserved_capacity();
                    self.unreserved_in_flight
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                            (n < capacity).then_some(n + 1)
                        })
                        .map_err(|_| self.throttled(function, capacity))?;
                    slot.in_flight.fetch_add(1, Ordering::AcqRel);
                    Some(Arc::clone(&self.unreserved_in_flight))
                }
            }
        };

        self.metrics.record_admitted(function);
        Ok(Permit {
            id: Uuid::new_v4(),
            function: function.to_string(),
            slot,
            unreserved_pool,
            metrics: Arc::clone(&self.metrics),
            released: AtomicBool::new(false),
        })
    }

    fn throttled(&self, function: &str, limit: u32) -> RoutingError {
        self.metrics.record_throttled(function);
        RoutingError::Throttled {
            function: function.to_string(),
            limit,
        }
    }

    /// Reserve `limit` slots for `function`; 0 disables it
    pub fn set_reserved_limit(&self, function: &str, limit: u32) -> RoutingResult<AdmissionMode> {
        let _serial = self.reservations.lock().map_err(|_| RoutingError::poisoned())?;
        let slot = self.slot_or_insert(function)?;
        let mut mode = slot.mode.write().map_err(|_| RoutingError::poisoned())?;

        match (*mode, limit) {
            (AdmissionMode::Unreserved, 0) => {
                return Err(RoutingError::InvalidState(format!(
                    "{} is unreserved; reserve capacity before disabling it",
                    function
                )));
            }
            (AdmissionMode::Disabled, 0) => {
                return Err(RoutingError::InvalidState(format!(
                    "{} is already disabled",
                    function
                )));
            }
            _ => {}
        }

        let current = mode.reserved_limit().unwrap_or(0);
        let total = self.reserved_total.load(Ordering::Acquire);
        let new_total = u64::from(total) - u64::from(current) + u64::from(limit);
        if new_total > u64::from(self.account_pool_limit) {
            return Err(RoutingError::InvalidArgument(format!(
                "Reserving {} for {} would exceed account pool {} (reserved elsewhere: {})",
                limit,
                function,
                self.account_pool_limit,
                total - current
            )));
        }

        *mode = if limit == 0 {
            AdmissionMode::Disabled
        } else {
            AdmissionMode::Reserved(limit)
        };
        self.reserved_total.store(new_total as u32, Ordering::Release);
        let next = *mode;
        drop(mode);

        let limit = limit.to_string();
        log_event_with_fields(
            Event::ReservationChanged,
            &[("function", function), ("limit", &limit), ("mode", next.as_str())],
        );
        Ok(next)
    }

    /// Return a reserved function to the shared pool
    pub fn remove_reservation(&self, function: &str) -> RoutingResult<()> {
        let _serial = self.reservations.lock().map_err(|_| RoutingError::poisoned())?;
        let slot = self.slot(function)?.ok_or_else(|| {
            RoutingError::InvalidState(format!("{} has no reservation", function))
        })?;
        let mut mode = slot.mode.write().map_err(|_| RoutingError::poisoned())?;

        let AdmissionMode::Reserved(limit) = *mode else {
            return Err(RoutingError::InvalidState(format!(
                "Cannot remove reservation of {} in mode {}",
                function, *mode
            )));
        };

        *mode = AdmissionMode::Unreserved;
        self.reserved_total.fetch_sub(limit, Ordering::AcqRel);
        drop(mode);

        log_event_with_fields(
            Event::ReservationChanged,
            &[("function", function), ("mode", AdmissionMode::Unreserved.as_str())],
        );
        Ok(())
    }

    /// Admission mode of a function; unknown functions are unreserved
    pub fn mode(&self, function: &str) -> RoutingResult<AdmissionMode> {
        match self.slot(function)? {
            Some(slot) => Ok(*slot.mode.read().map_err(|_| RoutingError::poisoned())?),
            None => Ok(AdmissionMode::Unreserved),
        }
    }

    /// In-flight invocations of one function
    pub fn in_flight(&self, function: &str) -> RoutingResult<u32> {
        Ok(self
            .slot(function)?
            .map(|slot| slot.in_flight.load(Ordering::Acquire))
            .unwrap_or(0))
    }

    /// In-flight invocations drawn from the shared pool
    pub fn unreserved_in_flight(&self) -> u32 {
        self.unreserved_in_flight.load(Ordering::Acquire)
    }

    /// Account pool minus every reservation
    pub fn unreserved_capacity(&self) -> u32 {
        self.account_pool_limit
            .saturating_sub(self.reserved_total.load(Ordering::Acquire))
    }

    pub fn account_pool_limit(&self) -> u32 {
        self.account_pool_limit
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    /// Export reservations for persistence
    pub fn config(&self) -> RoutingResult<ConcurrencyConfig> {
        let functions = self.functions.read().map_err(|_| RoutingError::poisoned())?;
        let mut reserved = BTreeMap::new();
        for (name, slot) in functions.iter() {
            let mode = slot.mode.read().map_err(|_| RoutingError::poisoned())?;
            if let Some(limit) = mode.reserved_limit() {
                reserved.insert(name.clone(), limit);
            }
        }
        Ok(ConcurrencyConfig {
            account_pool_limit: self.account_pool_limit,
            reserved,
        })
    }
}
