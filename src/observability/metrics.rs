//! Per-function routing and admission counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics; a snapshot is exact per counter, not across counters

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

#[derive(Debug, Default)]
struct FunctionCounters {
    admitted: AtomicU64,
    throttled: AtomicU64,
    released: AtomicU64,
    primary_selected: AtomicU64,
    secondary_selected: AtomicU64,
}

impl FunctionCounters {
    fn snapshot(&self) -> FunctionMetrics {
        FunctionMetrics {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            primary_selected: self.primary_selected.load(Ordering::Relaxed),
            secondary_selected: self.secondary_selected.load(Ordering::Relaxed),
        }
    }
}

/// Counter values of one function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FunctionMetrics {
    pub admitted: u64,
    pub throttled: u64,
    pub released: u64,
    pub primary_selected: u64,
    pub secondary_selected: u64,
}

/// Point-in-time copy of every function's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub functions: BTreeMap<String, FunctionMetrics>,
}

/// Counter registry keyed by function name
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    functions: RwLock<HashMap<String, Arc<FunctionCounters>>>,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, function: &str) -> Option<Arc<FunctionCounters>> {
        if let Ok(functions) = self.functions.read() {
            if let Some(counters) = functions.get(function) {
                return Some(Arc::clone(counters));
            }
        }
        // Metrics never fail the caller; a poisoned registry just stops counting
        let mut functions = self.functions.write().ok()?;
        Some(Arc::clone(functions.entry(function.to_string()).or_default()))
    }

    fn bump(&self, function: &str, pick: impl Fn(&FunctionCounters) -> &AtomicU64) {
        if let Some(counters) = self.counters(function) {
            pick(&counters).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_admitted(&self, function: &str) {
        self.bump(function, |c| &c.admitted);
    }

    pub fn record_throttled(&self, function: &str) {
        self.bump(function, |c| &c.throttled);
    }

    pub fn record_released(&self, function: &str) {
        self.bump(function, |c| &c.released);
    }

    pub fn record_primary(&self, function: &str) {
        self.bump(function, |c| &c.primary_selected);
    }

    pub fn record_secondary(&self, function: &str) {
        self.bump(function, |c| &c.secondary_selected);
    }

    /// Counters of one function; zero if it was never seen
    pub fn function(&self, function: &str) -> FunctionMetrics {
        self.functions
            .read()
            .ok()
            .and_then(|m| m.get(function).map(|c| c.snapshot()))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let functions: BTreeMap<String, FunctionMetrics> = self
            .functions
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.snapshot())).collect())
            .unwrap_or_default();
        MetricsSnapshot { functions }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_empty() {
        let metrics = RoutingMetrics::new();
        assert!(metrics.snapshot().functions.is_empty());
        assert_eq!(metrics.function("orders"), FunctionMetrics::default());
    }

    #[test]
    fn test_counters_are_per_function() {
        let metrics = RoutingMetrics::new();
        metrics.record_admitted("orders");
        metrics.record_admitted("orders");
        metrics.record_throttled("billing");
        metrics.record_secondary("orders");

        let orders = metrics.function("orders");
        assert_eq!(orders.admitted, 2);
        assert_eq!(orders.secondary_selected, 1);
        assert_eq!(orders.throttled, 0);
        assert_eq!(metrics.function("billing").throttled, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = RoutingMetrics::new();
        metrics.record_primary("orders");

        let json = metrics.to_json();
        assert_eq!(json["functions"]["orders"]["primary_selected"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let metrics = Arc::new(RoutingMetrics::new());
        let mut handles = vec![];

        for i in 0..10 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                let name = if i % 2 == 0 { "even" } else { "odd" };
                for _ in 0..100 {
                    m.record_admitted(name);
                    m.record_released(name);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.function("even").admitted, 500);
        assert_eq!(metrics.function("odd").released, 500);
    }
}
