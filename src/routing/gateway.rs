//! # Invocation Gateway
//!
//! Ties the pieces together for an executor: route the alias, admit the
//! resolved function, and hand back the version snapshot with its permit.

use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use super::alias::AliasTable;
use super::errors::{RoutingError, RoutingResult};
use super::governor::{AdmissionMode, ConcurrencyGovernor, Permit};
use super::retry::{acquire_with_retry, RetryPolicy};
use super::router::Router;
use super::store::{RoutingState, RoutingStore};
use super::version::{LatestPointer, Version, VersionStore};
use crate::observability::{log_event_with_fields, Event, RoutingMetrics};

/// What an admitted invocation runs against
#[derive(Debug, Clone)]
pub enum InvocationTarget {
    Version(Arc<Version>),
    /// Direct test invocation of the working copy
    Latest(LatestPointer),
}

/// An admitted invocation
///
/// Holds the admission permit; completing, failing or dropping the
/// invocation returns the slot.
#[derive(Debug)]
pub struct Invocation {
    pub id: Uuid,
    pub function: String,
    pub alias: Option<String>,
    pub target: InvocationTarget,
    permit: Permit,
}

impl Invocation {
    /// Version number served, `None` for `$LATEST`
    pub fn version_id(&self) -> Option<u64> {
        match &self.target {
            InvocationTarget::Version(v) => Some(v.version_id),
            InvocationTarget::Latest(_) => None,
        }
    }

    pub fn permit(&self) -> &Permit {
        &self.permit
    }

    /// Finish the invocation, successful or not
    pub fn complete(self) -> RoutingResult<()> {
        self.permit.release()
    }
}

/// Versions, aliases, router and governor behind one handle
#[derive(Debug, Clone)]
pub struct Gateway {
    versions: Arc<VersionStore>,
    aliases: Arc<AliasTable>,
    router: Router,
    governor: Arc<ConcurrencyGovernor>,
    metrics: Arc<RoutingMetrics>,
}

impl Gateway {
    /// Empty gateway over an account pool
    pub fn new(account_pool_limit: u32) -> Self {
        let metrics = Arc::new(RoutingMetrics::new());
        let versions = Arc::new(VersionStore::new());
        let aliases = Arc::new(AliasTable::new(Arc::clone(&versions)));
        let governor = Arc::new(ConcurrencyGovernor::new(
            account_pool_limit,
            Arc::clone(&metrics),
        ));
        Self::assemble(versions, aliases, governor, metrics)
    }

    fn assemble(
        versions: Arc<VersionStore>,
        aliases: Arc<AliasTable>,
        governor: Arc<ConcurrencyGovernor>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        let router = Router::new(Arc::clone(&aliases), Arc::clone(&metrics));
        Self {
            versions,
            aliases,
            router,
            governor,
            metrics,
        }
    }

    /// Rebuild from a persisted state
    pub fn from_state(state: RoutingState) -> RoutingResult<Self> {
        let metrics = Arc::new(RoutingMetrics::new());
        let versions = Arc::new(VersionStore::from_records(state.functions)?);
        let aliases = Arc::new(AliasTable::restore(Arc::clone(&versions), state.aliases)?);
        let governor = Arc::new(ConcurrencyGovernor::from_config(
            &state.concurrency,
            Arc::clone(&metrics),
        )?);
        Ok(Self::assemble(versions, aliases, governor, metrics))
    }

    /// Load from `store`, starting empty when nothing was saved
    ///
    /// `account_pool_limit` overrides the saved pool size.
    pub fn restore(store: &dyn RoutingStore, account_pool_limit: u32) -> RoutingResult<Self> {
        let Some(mut state) = store.load()? else {
            return Ok(Self::new(account_pool_limit));
        };
        state.concurrency.account_pool_limit = account_pool_limit;

        let functions = state.functions.len().to_string();
        let aliases = state.aliases.len().to_string();
        let gateway = Self::from_state(state)?;
        log_event_with_fields(
            Event::StateLoaded,
            &[("aliases", &aliases), ("functions", &functions)],
        );
        Ok(gateway)
    }

    /// Export the current state
    pub fn snapshot(&self) -> RoutingResult<RoutingState> {
        Ok(RoutingState {
            functions: self.versions.export()?,
            aliases: self.aliases.export()?,
            concurrency: self.governor.config()?,
        })
    }

    /// Export, then write outside of every routing lock
    pub fn persist(&self, store: &dyn RoutingStore) -> RoutingResult<()> {
        let state = self.snapshot()?;
        store.save(&state)?;
        Ok(())
    }

    /// Route `alias` of `function` and admit the resolved version
    pub fn begin_invocation<R: Rng + ?Sized>(
        &self,
        function: &str,
        alias: &str,
        rng: &mut R,
    ) -> RoutingResult<Invocation> {
        self.begin_invocation_with_retry(function, alias, &RetryPolicy::none(), rng)
    }

    /// Like `begin_invocation`, riding out throttles under `policy`
    ///
    /// The version is resolved once; only admission is retried.
    pub fn begin_invocation_with_retry<R: Rng + ?Sized>(
        &self,
        function: &str,
        alias: &str,
        policy: &RetryPolicy,
        rng: &mut R,
    ) -> RoutingResult<Invocation> {
        let version = self.router.resolve_version(function, alias, rng)?;
        let permit = acquire_with_retry(&self.governor, function, policy, rng)?;
        Ok(Self::admitted(
            function,
            Some(alias),
            InvocationTarget::Version(version),
            permit,
        ))
    }

    /// Admit a direct invocation of `$LATEST`
    pub fn invoke_latest(&self, function: &str) -> RoutingResult<Invocation> {
        let latest = self.versions.latest(function)?;
        let permit = self.governor.try_acquire(function)?;
        Ok(Self::admitted(function, None, InvocationTarget::Latest(latest), permit))
    }

    /// Like `invoke_latest`, riding out throttles under `policy`
    pub fn invoke_latest_with_retry<R: Rng + ?Sized>(
        &self,
        function: &str,
        policy: &RetryPolicy,
        rng: &mut R,
    ) -> RoutingResult<Invocation> {
        let latest = self.versions.latest(function)?;
        let permit = acquire_with_retry(&self.governor, function, policy, rng)?;
        Ok(Self::admitted(function, None, InvocationTarget::Latest(latest), permit))
    }

    fn admitted(
        function: &str,
        alias: Option<&str>,
        target: InvocationTarget,
        permit: Permit,
    ) -> Invocation {
        Invocation {
            id: Uuid::new_v4(),
            function: function.to_string(),
            alias: alias.map(str::to_string),
            target,
            permit,
        }
    }

    /// Reserve concurrency for a registered function; 0 disables it
    pub fn set_reserved_limit(&self, function: &str, limit: u32) -> RoutingResult<AdmissionMode> {
        self.require_function(function)?;
        self.governor.set_reserved_limit(function, limit)
    }

    /// Return a registered function to the shared pool
    pub fn remove_reservation(&self, function: &str) -> RoutingResult<()> {
        self.require_function(function)?;
        self.governor.remove_reservation(function)
    }

    fn require_function(&self, function: &str) -> RoutingResult<()> {
        if self.versions.contains_function(function)? {
            Ok(())
        } else {
            Err(RoutingError::NotFound(format!(
                "Function not found: {}",
                function
            )))
        }
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn aliases(&self) -> &Arc<AliasTable> {
        &self.aliases
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn governor(&self) -> &Arc<ConcurrencyGovernor> {
        &self.governor
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }
}
