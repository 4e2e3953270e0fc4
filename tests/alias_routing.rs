//! Alias Routing Invariants
//!
//! - `resolve` never observes a half-applied `update_alias`
//! - Invocations of a live alias succeed while old versions are deleted
//! - Weighted selection converges on the configured weight
//! - Weight 1 always selects the secondary

use canary_router::observability::RoutingMetrics;
use canary_router::routing::{
    select, AliasRouting, AliasTable, Gateway, Qualifier, Router, Selection, VersionStore,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn router_with_versions(function: &str, n: u64) -> Router {
    let versions = Arc::new(VersionStore::new());
    versions.create_function(function, "code", "config").unwrap();
    for _ in 0..n {
        versions.publish(function, "").unwrap();
    }
    let aliases = Arc::new(AliasTable::new(versions));
    aliases.create_alias(function, "PROD", 1).unwrap();
    Router::new(aliases, Arc::new(RoutingMetrics::new()))
}

// =============================================================================
// Atomicity
// =============================================================================

/// Configuration k routes primary k, secondary k + 10, weight k / 10.
fn config(k: u64) -> (u64, Option<u64>, Option<f64>) {
    if k % 3 == 0 {
        (k, None, None)
    } else {
        (k, Some(k + 10), Some(k as f64 / 10.0))
    }
}

fn is_consistent(routing: &AliasRouting) -> bool {
    let (primary, secondary, weight) = config(routing.primary_version_id);
    routing.secondary_version_id == secondary && routing.secondary_weight == weight
}

/// Readers racing writers only ever see complete configurations.
#[test]
fn test_resolve_never_torn() {
    let router = router_with_versions("search", 20);
    let aliases = Arc::clone(router.aliases());
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..2)
        .map(|w| {
            let aliases = Arc::clone(&aliases);
            thread::spawn(move || {
                for round in 0..2_000u64 {
                    let k = (round + w * 5) % 10 + 1;
                    let (primary, secondary, weight) = config(k);
                    aliases
                        .update_alias("search", "PROD", primary, secondary, weight)
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let aliases = Arc::clone(&aliases);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let routing = aliases.resolve("search", "PROD").unwrap();
                    assert!(is_consistent(&routing), "torn read: {:?}", routing);
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    // Versions referenced by the final configuration are the only ones pinned
    let final_routing = aliases.resolve("search", "PROD").unwrap();
    let versions = Arc::clone(aliases.versions());
    for id in 1..=20u64 {
        let pinned = final_routing.version_ids().contains(&id);
        let deleted = versions
            .delete("search", Qualifier::Version(id))
            .is_ok();
        assert_eq!(deleted, !pinned, "version {}", id);
    }
}

/// Cutover followed by deletion of the old version never fails a caller of
/// the live alias; it sees either the old or the new version.
#[test]
fn test_invocations_survive_cutover_and_delete() {
    let gateway = Gateway::new(1_000);
    gateway.versions().create_function("search", "code-1", "cfg").unwrap();
    gateway.versions().publish("search", "").unwrap();
    gateway.aliases().create_alias("search", "PROD", 1).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let callers: Vec<_> = (0..4u64)
        .map(|seed| {
            let gateway = gateway.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut served = 0u64;
                loop {
                    let invocation = gateway
                        .begin_invocation("search", "PROD", &mut rng)
                        .unwrap_or_else(|e| panic!("live alias failed: {}", e));
                    assert!(invocation.version_id().is_some());
                    invocation.complete().unwrap();
                    served += 1;
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                served
            })
        })
        .collect();

    for next in 2..=1_000u64 {
        let published = gateway.versions().publish("search", "").unwrap();
        assert_eq!(published.version_id, next);
        gateway
            .aliases()
            .update_alias("search", "PROD", next, None, None)
            .unwrap();
        gateway
            .versions()
            .delete("search", Qualifier::Version(next - 1))
            .unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for caller in callers {
        assert!(caller.join().unwrap() > 0);
    }
    assert_eq!(gateway.governor().in_flight("search").unwrap(), 0);
    assert_eq!(gateway.versions().list_versions("search").unwrap().len(), 1);
}

// =============================================================================
// Weighted distribution
// =============================================================================

/// 10% canary over 100,000 draws lands within one percentage point.
#[test]
fn test_weighted_distribution() {
    let router = router_with_versions("search", 2);
    router
        .aliases()
        .update_alias("search", "PROD", 1, Some(2), Some(0.1))
        .unwrap();

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let draws = 100_000;
    let secondary = (0..draws)
        .filter(|_| router.resolve_invocation_target("search", "PROD", &mut rng).unwrap() == 2)
        .count();

    let fraction = secondary as f64 / draws as f64;
    assert!((fraction - 0.1).abs() < 0.01, "fraction {}", fraction);
}

#[test]
fn test_boundary_weights() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..10_000 {
        let draw: f64 = rand::Rng::gen(&mut rng);
        assert_eq!(select(0.0, draw), Selection::Primary);
        assert_eq!(select(1.0, draw), Selection::Secondary);
    }
}

/// Full cutover through a weight of 1 before dropping the secondary.
#[test]
fn test_weight_one_is_complete_cutover() {
    let router = router_with_versions("search", 2);
    let mut rng = StdRng::seed_from_u64(2);

    router
        .aliases()
        .update_alias("search", "PROD", 1, Some(2), Some(1.0))
        .unwrap();
    for _ in 0..5_000 {
        assert_eq!(router.resolve_invocation_target("search", "PROD", &mut rng).unwrap(), 2);
    }

    router.aliases().update_alias("search", "PROD", 2, None, None).unwrap();
    for _ in 0..100 {
        assert_eq!(router.resolve_invocation_target("search", "PROD", &mut rng).unwrap(), 2);
    }
}
