//! # Resolve State
//!
//! The LDS/RDS watcher state machine (section 4.F): subscribes to LDS,
//! optionally to RDS, normalizes updates into a `RoutingConfig` snapshot,
//! drives the cluster reference table, and emits resolution results. Every
//! transition runs on the synchronization context; external watcher
//! callbacks re-enter it before touching any field here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::cluster_refs::ClusterRefTable;
use crate::matchers::select_virtual_host;
use crate::model::{FilterConfig, LdsUpdate, NamedFilterConfig, RdsUpdate, RoutingConfig, VirtualHost};
use crate::sync_context::SynchronizationContext;
use crate::xds_client::{ResourceWatcher, XdsClient};

/// What downstream observes after a state transition: either a refreshed
/// routing view (service config shape is the caller's job to build from
/// the cluster table and `RoutingConfig`) or an error forwarded verbatim
/// from a watcher.
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    /// A new `RoutingConfig` was published; `cluster_membership_changed`
    /// tells the caller whether the emitted load-balancing service config
    /// actually needs to change.
    Updated { cluster_membership_changed: bool },
    /// `cleanUpRoutes` ran: the listener or route resource is gone.
    Empty,
    /// Forwarded verbatim from the LDS or RDS watcher (section 4.F: both
    /// watchers may fire, and both forwards are expected — see the open
    /// question this resolves in the design ledger).
    Error(tonic::Status),
}

struct Inner {
    authority: String,
    cluster_table: Arc<ClusterRefTable>,
    routing_config: Arc<ArcSwap<RoutingConfig>>,
    sync_context: SynchronizationContext,
    xds_client: Arc<dyn XdsClient>,
    on_result: Arc<dyn Fn(ResolutionResult) + Send + Sync>,

    existing_clusters: Mutex<Vec<String>>,
    rds_name: Mutex<Option<String>>,
    stopped: AtomicBool,
    /// Bumped on every RDS (re)subscription so a watcher callback can
    /// detect it has been superseded (the pointer-identity check in
    /// section 4.F, reduced to a generation counter since callbacks here
    /// are plain closures rather than objects compared by identity).
    rds_generation: AtomicU64,
}

/// Owns the watcher state machine for one resolver instance. Cloning
/// shares the same state; watcher callbacks are registered against a
/// clone so they can outlive the call that created them.
#[derive(Clone)]
pub struct ResolveState {
    inner: Arc<Inner>,
}

impl ResolveState {
    pub fn new(
        authority: impl Into<String>,
        cluster_table: Arc<ClusterRefTable>,
        routing_config: Arc<ArcSwap<RoutingConfig>>,
        sync_context: SynchronizationContext,
        xds_client: Arc<dyn XdsClient>,
        on_result: Arc<dyn Fn(ResolutionResult) + Send + Sync>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority: authority.into(),
                cluster_table,
                routing_config,
                sync_context,
                xds_client,
                on_result,
                existing_clusters: Mutex::new(Vec::new()),
                rds_name: Mutex::new(None),
                stopped: AtomicBool::new(false),
                rds_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Initial -> LDS-only: subscribe LDS on the resolver's authority.
    pub fn start(&self) {
        let authority = self.inner.authority.clone();
        let watcher: Arc<dyn ResourceWatcher<LdsUpdate>> = Arc::new(LdsWatcher { state: self.clone() });
        self.inner.xds_client.watch_lds_resource(&authority, watcher);
    }

    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let authority = self.inner.authority.clone();
        self.inner.xds_client.cancel_lds_resource_watch(&authority);
        if let Some(rds_name) = self.inner.rds_name.lock().unwrap().take() {
            self.inner.xds_client.cancel_rds_resource_watch(&rds_name);
        }
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn emit(&self, result: ResolutionResult) {
        if !self.is_stopped() {
            (self.inner.on_result)(result);
        }
    }

    fn on_lds_changed(&self, update: LdsUpdate) {
        let _span = crate::watcher_span!("lds", self.inner.authority).entered();
        let this = self.clone();
        self.inner.sync_context.execute(move || this.handle_lds_changed(update));
    }

    fn on_lds_missing(&self) {
        let _span = crate::watcher_span!("lds", self.inner.authority).entered();
        tracing::debug!("listener resource does not exist, cleaning up routes");
        let this = self.clone();
        self.inner.sync_context.execute(move || {
            // The listener is gone: any RDS watch it pointed to must be
            // cancelled too, and its generation bumped so a racing
            // in-flight RDS callback is dropped as stale rather than
            // resurrecting routes for a listener that no longer exists.
            this.cancel_rds_watch();
            this.clean_up_routes();
        });
    }

    fn on_lds_error(&self, status: tonic::Status) {
        tracing::warn!(%status, "lds watcher error");
        let this = self.clone();
        self.inner.sync_context.execute(move || this.emit(ResolutionResult::Error(status)));
    }

    fn on_rds_missing(&self, generation: u64) {
        let _span = crate::watcher_span!("rds", self.inner.authority).entered();
        let this = self.clone();
        self.inner.sync_context.execute(move || {
            if this.inner.rds_generation.load(Ordering::SeqCst) == generation {
                // The RDS resource itself is missing, not revoked; the
                // watch on this name stays active (§4.F: only the
                // LDS-missing path tears down the RDS watch).
                tracing::debug!("route configuration does not exist, cleaning up routes");
                this.clean_up_routes();
            }
        });
    }

    fn on_rds_error(&self, status: tonic::Status) {
        tracing::warn!(%status, "rds watcher error");
        let this = self.clone();
        self.inner.sync_context.execute(move || this.emit(ResolutionResult::Error(status)));
    }

    fn handle_lds_changed(&self, update: LdsUpdate) {
        if self.is_stopped() {
            return;
        }
        match update {
            LdsUpdate::InlineRoutes { http_max_stream_duration, virtual_hosts, filter_chain } => {
                self.cancel_rds_watch();
                self.update_routes(&virtual_hosts, http_max_stream_duration, filter_chain.as_deref());
            }
            LdsUpdate::RdsPointer { http_max_stream_duration, rds_name, filter_chain } => {
                self.subscribe_rds(rds_name, http_max_stream_duration, filter_chain);
            }
        }
    }

    fn cancel_rds_watch(&self) {
        if let Some(name) = self.inner.rds_name.lock().unwrap().take() {
            // Bump the generation so any callback already in flight from
            // the cancelled watcher fails the staleness check in
            // `RdsWatcher::on_changed`/`on_resource_does_not_exist` and is
            // dropped silently instead of acting on a superseded watch.
            self.inner.rds_generation.fetch_add(1, Ordering::SeqCst);
            self.inner.xds_client.cancel_rds_resource_watch(&name);
        }
    }

    fn subscribe_rds(&self, rds_name: String, fallback_timeout: Option<Duration>, filter_chain: Option<Arc<Vec<NamedFilterConfig>>>) {
        let previous = self.inner.rds_name.lock().unwrap().clone();
        if previous.as_deref() != Some(rds_name.as_str()) {
            if let Some(previous) = previous {
                self.inner.xds_client.cancel_rds_resource_watch(&previous);
            }
        }
        *self.inner.rds_name.lock().unwrap() = Some(rds_name.clone());
        let generation = self.inner.rds_generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(rds_name, generation, "subscribing to route configuration");

        let watcher: Arc<dyn ResourceWatcher<RdsUpdate>> =
            Arc::new(RdsWatcher { state: self.clone(), generation, fallback_timeout, filter_chain });
        self.inner.xds_client.watch_rds_resource(&rds_name, watcher);
    }

    /// `updateRoutes` (section 4.F): select the virtual host, compute the
    /// effective filter chain and route set, reconcile cluster membership,
    /// publish the new `RoutingConfig`, and emit iff membership changed.
    fn update_routes(&self, virtual_hosts: &[VirtualHost], fallback_timeout: Option<Duration>, filter_chain: Option<&[NamedFilterConfig]>) {
        let domains: Vec<&[String]> = virtual_hosts.iter().map(|vh| vh.domains.as_slice()).collect();
        let selected = match select_virtual_host(&self.inner.authority, domains) {
            Ok(Some(idx)) => idx,
            Ok(None) | Err(_) => {
                self.clean_up_routes();
                return;
            }
        };
        let vhost = &virtual_hosts[selected];

        let (routes, effective_chain) = match filter_chain {
            None => (vhost.routes.clone(), None),
            Some(chain) => match router_prefix(chain) {
                Some(prefix) => (vhost.routes.clone(), Some(prefix)),
                None => {
                    let mut lame_chain = chain.to_vec();
                    lame_chain.push(NamedFilterConfig { name: "lame".to_string(), config: FilterConfig::Lame });
                    (Vec::new(), Some(lame_chain))
                }
            },
        };

        let mut cluster_names: Vec<String> = routes.iter().flat_map(|r| r.action.cluster_names()).map(str::to_string).collect();
        cluster_names.sort();
        cluster_names.dedup();

        let previous = {
            let mut existing = self.inner.existing_clusters.lock().unwrap();
            let previous = existing.clone();
            *existing = cluster_names.clone();
            previous
        };

        let changed = self.inner.cluster_table.apply_membership(&cluster_names, &previous);

        let route_count = routes.len();
        let routing_config = RoutingConfig {
            fallback_timeout,
            routes: Arc::new(routes),
            filter_chain: effective_chain.map(Arc::new),
            virtual_host_override: vhost.filter_overrides.clone(),
        };
        self.inner.routing_config.store(Arc::new(routing_config));
        tracing::debug!(cluster_membership_changed = changed, route_count, "published routing config");

        self.emit(ResolutionResult::Updated { cluster_membership_changed: changed });
    }

    /// `cleanUpRoutes` (section 4.F): decrement every currently-present
    /// cluster, drop the tracked membership set, reset to an empty
    /// `RoutingConfig`, and emit an empty result.
    fn clean_up_routes(&self) {
        let previous = {
            let mut existing = self.inner.existing_clusters.lock().unwrap();
            std::mem::take(&mut *existing)
        };
        self.inner.cluster_table.apply_membership(&[], &previous);
        self.inner.routing_config.store(Arc::new(RoutingConfig::empty()));
        tracing::debug!(released_clusters = previous.len(), "cleaned up routes");
        self.emit(ResolutionResult::Empty);
    }
}

/// Prefix of `chain` up to and including the first `Router` entry,
/// `None` if no router filter is present (section 4.F step 2).
fn router_prefix(chain: &[NamedFilterConfig]) -> Option<Vec<NamedFilterConfig>> {
    let router_idx = chain.iter().position(|f| matches!(f.config, FilterConfig::Router))?;
    Some(chain[..=router_idx].to_vec())
}

struct LdsWatcher {
    state: ResolveState,
}

impl ResourceWatcher<LdsUpdate> for LdsWatcher {
    fn on_changed(&self, update: LdsUpdate) {
        self.state.on_lds_changed(update);
    }
    fn on_error(&self, status: tonic::Status) {
        self.state.on_lds_error(status);
    }
    fn on_resource_does_not_exist(&self, _name: &str) {
        self.state.on_lds_missing();
    }
}

struct RdsWatcher {
    state: ResolveState,
    generation: u64,
    fallback_timeout: Option<Duration>,
    filter_chain: Option<Arc<Vec<NamedFilterConfig>>>,
}

impl ResourceWatcher<RdsUpdate> for RdsWatcher {
    fn on_changed(&self, update: RdsUpdate) {
        let _span = crate::watcher_span!("rds", self.state.inner.authority).entered();
        let state = self.state.clone();
        let generation = self.generation;
        let fallback_timeout = self.fallback_timeout;
        let filter_chain = self.filter_chain.clone();
        state.inner.sync_context.execute(move || {
            if state.is_stopped() || state.inner.rds_generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(generation, "dropping stale rds update, superseded by a later subscription");
                return;
            }
            state.update_routes(&update.virtual_hosts, fallback_timeout, filter_chain.as_deref());
        });
    }
    fn on_error(&self, status: tonic::Status) {
        self.state.on_rds_error(status);
    }
    fn on_resource_does_not_exist(&self, _name: &str) {
        self.state.on_rds_missing(self.generation);
    }
}
