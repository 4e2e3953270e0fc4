//! # Router
//!
//! Resolves `(function, alias)` to a concrete version, splitting traffic
//! between primary and secondary with a caller-supplied RNG.

use std::sync::Arc;

use rand::Rng;

use super::alias::{AliasRouting, AliasTable};
use super::errors::{RoutingError, RoutingResult};
use super::version::Version;
use crate::observability::RoutingMetrics;

/// Which side of a split served a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Primary,
    Secondary,
}

/// Pick primary or secondary for a single uniform draw in [0, 1)
///
/// A weight of 0 never selects the secondary and a weight of 1 always does.
pub fn select(secondary_weight: f64, draw: f64) -> Selection {
    if draw < secondary_weight {
        Selection::Secondary
    } else {
        Selection::Primary
    }
}

/// Weighted alias router
#[derive(Debug, Clone)]
pub struct Router {
    aliases: Arc<AliasTable>,
    metrics: Arc<RoutingMetrics>,
}

impl Router {
    pub fn new(aliases: Arc<AliasTable>, metrics: Arc<RoutingMetrics>) -> Self {
        Self { aliases, metrics }
    }

    pub fn aliases(&self) -> &Arc<AliasTable> {
        &self.aliases
    }

    /// Resolve the version that should serve one invocation
    pub fn resolve_invocation_target<R: Rng + ?Sized>(
        &self,
        function: &str,
        alias: &str,
        rng: &mut R,
    ) -> RoutingResult<u64> {
        let routing = self.aliases.resolve(function, alias)?;
        let (version_id, selection) = Self::pick(&routing, rng);
        self.record(function, selection);
        Ok(version_id)
    }

    /// Resolve the version snapshot that should serve one invocation
    ///
    /// A cutover can unpin and delete the picked version between the routing
    /// read and the lookup. The alias is then read again; the lookup error
    /// stands only when the alias still routes the same way.
    pub fn resolve_version<R: Rng + ?Sized>(
        &self,
        function: &str,
        alias: &str,
        rng: &mut R,
    ) -> RoutingResult<Arc<Version>> {
        let versions = self.aliases.versions();
        let mut routing = self.aliases.resolve(function, alias)?;
        loop {
            let (version_id, selection) = Self::pick(&routing, rng);
            match versions.get_shared(function, version_id) {
                Ok(version) => {
                    self.record(function, selection);
                    return Ok(version);
                }
                Err(err @ RoutingError::NotFound(_)) => {
                    let current = self.aliases.resolve(function, alias)?;
                    if current == routing {
                        return Err(err);
                    }
                    routing = current;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn record(&self, function: &str, selection: Selection) {
        match selection {
            Selection::Primary => self.metrics.record_primary(function),
            Selection::Secondary => self.metrics.record_secondary(function),
        }
    }

    /// Apply a routing snapshot to one draw from `rng`
    ///
    /// No draw is taken when the routing has no secondary.
    pub fn pick<R: Rng + ?Sized>(routing: &AliasRouting, rng: &mut R) -> (u64, Selection) {
        match routing.split() {
            None => (routing.primary_version_id, Selection::Primary),
            Some((secondary, weight)) => {
                let draw: f64 = rng.gen();
                match select(weight, draw) {
                    Selection::Secondary => (secondary, Selection::Secondary),
                    Selection::Primary => (routing.primary_version_id, Selection::Primary),
                }
            }
        }
    }
}
