//! # Config Selector
//!
//! Per-call algorithm (section 4.E): match a route against a snapshot of
//! the current `RoutingConfig`, pick a cluster, retain it in the cluster
//! reference table, compute the per-method timeout and the consistent-
//! hash key, and assemble the filter chain's interceptors plus the
//! cluster-selection interceptor that eventually releases the retain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tonic::Status;

use crate::cluster_refs::ClusterRefTable;
use crate::config;
use crate::errors::ResolverError;
use crate::filters::{CallStart, ClientInterceptor, FilterRegistry, PickArgs, Scheduler};
use crate::hash::{hash_ascii_string, hash_long, rotate_left_1};
use crate::matchers::HeaderIndex;
use crate::model::{FilterConfig, RouteAction, RoutingConfig};
use crate::service_config;
use crate::xds_client::ServiceConfigParser;

/// The call options a real channel's cluster-selection interceptor would
/// set before `newCall` (section 6): `CLUSTER_SELECTION_KEY` and
/// `RPC_HASH_KEY`.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub cluster: String,
    pub rpc_hash: i64,
}

/// Releases its cluster retain exactly once, whichever of "response
/// headers observed" or "call closed without headers" happens first
/// (section 4.E step 10, the `ClusterSelectionInterceptor` contract).
pub struct ClusterSelectionGuard {
    cluster: String,
    table: Arc<ClusterRefTable>,
    released: AtomicBool,
}

impl ClusterSelectionGuard {
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.table.release(&self.cluster);
        }
    }
}

impl Drop for ClusterSelectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// A successful selection: what the caller needs to actually place the
/// call, plus the retain it must eventually release.
pub struct SelectedCall {
    pub call_options: CallOptions,
    pub parsed_service_config: Arc<Value>,
    pub interceptors: Vec<Arc<dyn ClientInterceptor>>,
    pub cluster_guard: ClusterSelectionGuard,
}

pub enum SelectOutcome {
    Success(SelectedCall),
    Error(Status),
}

/// Fails every call immediately; the interceptor attached when the
/// current `RoutingConfig`'s filter chain is LAME (no router filter
/// present, section 4.E step 1).
struct LameInterceptor;

impl ClientInterceptor for LameInterceptor {
    fn start_call(&self) -> CallStart {
        CallStart::Aborted(Status::unavailable("No router filter"))
    }
}

pub struct ConfigSelector {
    routing_config: Arc<ArcSwap<RoutingConfig>>,
    cluster_table: Arc<ClusterRefTable>,
    filter_registry: Arc<FilterRegistry>,
    scheduler: Arc<dyn Scheduler>,
    service_config_parser: Arc<dyn ServiceConfigParser>,
    /// Stable 64-bit identifier allocated once at resolver construction,
    /// hashed by the `CHANNEL_ID` hash policy (section 4.E step 8).
    channel_id: i64,
}

impl ConfigSelector {
    pub fn new(
        routing_config: Arc<ArcSwap<RoutingConfig>>,
        cluster_table: Arc<ClusterRefTable>,
        filter_registry: Arc<FilterRegistry>,
        scheduler: Arc<dyn Scheduler>,
        service_config_parser: Arc<dyn ServiceConfigParser>,
        channel_id: i64,
    ) -> Self {
        Self { routing_config, cluster_table, filter_registry, scheduler, service_config_parser, channel_id }
    }

    /// Runs the full per-call algorithm. `rng` backs every random draw in
    /// this attempt: route fraction matching, weighted-cluster selection,
    /// and the random-hash fallback. Retried in place (never recurses)
    /// when `retain` loses a race with a concurrent eviction.
    pub fn select(&self, method: &str, headers: &HeaderIndex, rng: &mut dyn FnMut(u32) -> u32) -> SelectOutcome {
        let _span = crate::select_span!(method).entered();
        loop {
            let snapshot = self.routing_config.load_full();

            if snapshot.is_lame() {
                tracing::debug!("filter chain is lame, failing call without a route lookup");
                return SelectOutcome::Success(SelectedCall {
                    call_options: CallOptions { cluster: String::new(), rpc_hash: 0 },
                    parsed_service_config: Arc::new(Value::Null),
                    interceptors: vec![Arc::new(LameInterceptor)],
                    cluster_guard: ClusterSelectionGuard {
                        cluster: String::new(),
                        table: self.cluster_table.clone(),
                        released: AtomicBool::new(true),
                    },
                });
            }

            let Some(route) = snapshot.routes.iter().find(|r| r.matcher.matches(method, headers, &mut *rng)) else {
                tracing::debug!(method, "no route matched");
                return SelectOutcome::Error(ResolverError::route("Could not find xDS route matching RPC").to_status());
            };

            let (cluster, override_layers) = pick_cluster(&route.action, &route.filter_overrides, &mut *rng);
            let merged_overrides = crate::model::merge_overrides(&[
                &snapshot.virtual_host_override,
                &route.filter_overrides,
                &override_layers,
            ]);

            if !self.cluster_table.retain(&cluster) {
                tracing::debug!(cluster, "retain lost a race with a concurrent eviction, retrying selection");
                continue;
            }

            match self.assemble(&snapshot, &route.action, &cluster, &merged_overrides, headers, &mut *rng) {
                Ok(selected) => return SelectOutcome::Success(selected),
                Err(status) => {
                    tracing::warn!(cluster, %status, "assembling selected call failed, releasing retain");
                    self.cluster_table.release(&cluster);
                    return SelectOutcome::Error(status);
                }
            }
        }
    }

    fn assemble(
        &self,
        snapshot: &RoutingConfig,
        action: &RouteAction,
        cluster: &str,
        merged_overrides: &crate::model::FilterOverrideMap,
        headers: &HeaderIndex,
        rng: &mut dyn FnMut(u32) -> u32,
    ) -> Result<SelectedCall, Status> {
        let timeout = action.timeout().or(snapshot.fallback_timeout);
        let effective_timeout = match timeout {
            Some(t) if config::enable_timeouts() && !t.is_zero() => Some(t),
            _ => None,
        };
        let raw_config = service_config::method_timeout_config(effective_timeout);
        let parsed_service_config = self
            .service_config_parser
            .parse(&raw_config)
            .map_err(|err| ResolverError::service_config(format!("method config: {err}")).to_status())?;

        let rpc_hash = compute_rpc_hash(action, headers, self.channel_id, &mut *rng);

        let interceptors = match &snapshot.filter_chain {
            None => Vec::new(),
            Some(chain) => chain
                .iter()
                .filter_map(|named| {
                    let filter = self.filter_registry.get(&named.name)?;
                    let effective = merged_overrides.get(&named.name).unwrap_or(&named.config);
                    filter.build(effective, PickArgs { headers, rng: &mut *rng }, &self.scheduler)
                })
                .collect(),
        };

        Ok(SelectedCall {
            call_options: CallOptions { cluster: cluster.to_string(), rpc_hash },
            parsed_service_config,
            interceptors,
            cluster_guard: ClusterSelectionGuard {
                cluster: cluster.to_string(),
                table: self.cluster_table.clone(),
                released: AtomicBool::new(false),
            },
        })
    }
}

/// Resolves the cluster action to a concrete cluster name (drawing a
/// weighted pick when needed) and the third filter-override layer
/// (`weightedCluster`, empty for a direct `cluster()` action).
fn pick_cluster<'a>(
    action: &'a RouteAction,
    _route_overrides: &crate::model::FilterOverrideMap,
    rng: &mut dyn FnMut(u32) -> u32,
) -> (String, crate::model::FilterOverrideMap) {
    match action {
        RouteAction::Cluster { name, .. } => (name.clone(), crate::model::FilterOverrideMap::new()),
        RouteAction::WeightedClusters { clusters, .. } => {
            let total: u32 = clusters.iter().map(|c| c.weight).sum();
            let draw = if total == 0 { 0 } else { rng(total) };
            let mut cumulative = 0u32;
            for weighted in clusters {
                cumulative += weighted.weight;
                if draw < cumulative {
                    return (weighted.name.clone(), (*weighted.filter_overrides).clone());
                }
            }
            let last = clusters.last().expect("weighted clusters list is non-empty");
            (last.name.clone(), (*last.filter_overrides).clone())
        }
    }
}

/// Section 4.E step 8: walk the policies in order, combining each
/// produced hash with `rotate_left_1(running) XOR newHash`, short-
/// circuiting on a terminal policy that produced one. Falls back to a
/// freshly drawn random value if no policy produced anything.
fn compute_rpc_hash(action: &RouteAction, headers: &HeaderIndex, channel_id: i64, rng: &mut dyn FnMut(u32) -> u32) -> i64 {
    let mut hash: Option<i64> = None;
    for policy in action.hash_policies() {
        let new_hash = match policy {
            crate::model::HashPolicy::Header { name, regex_rewrite, .. } => headers.get(name).map(|value| {
                let rewritten = match regex_rewrite {
                    Some((re, substitution)) => re.replace_all(value, substitution.as_str()).into_owned(),
                    None => value.to_string(),
                };
                hash_ascii_string(&rewritten)
            }),
            crate::model::HashPolicy::ChannelId { .. } => Some(hash_long(channel_id)),
        };
        if let Some(new_hash) = new_hash {
            hash = Some(rotate_left_1(hash.unwrap_or(0)) ^ new_hash);
            if policy.is_terminal() {
                break;
            }
        }
    }
    hash.unwrap_or_else(|| random_i64(rng))
}

fn random_i64(rng: &mut dyn FnMut(u32) -> u32) -> i64 {
    let hi = rng(u32::MAX) as u64;
    let lo = rng(u32::MAX) as u64;
    ((hi << 32) | lo) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_refs::ClusterRefTable;
    use crate::filters::FilterRegistry;
    use crate::filters::TokioScheduler;
    use crate::matchers::PathMatcher;
    use crate::model::{ClusterWeight, FilterOverrideMap, NamedFilterConfig, Route, RouteMatch};
    use crate::sync_context::SynchronizationContext;
    use crate::xds_client::test_support::{FailingParser, PassthroughParser};
    use std::time::Duration;

    fn table() -> Arc<ClusterRefTable> {
        Arc::new(ClusterRefTable::new(SynchronizationContext::new(), Arc::new(|| {})))
    }

    fn selector_with(
        routing: RoutingConfig,
        cluster_table: Arc<ClusterRefTable>,
        parser: Arc<dyn ServiceConfigParser>,
    ) -> ConfigSelector {
        ConfigSelector::new(
            Arc::new(ArcSwap::from_pointee(routing)),
            cluster_table,
            Arc::new(FilterRegistry::with_defaults()),
            Arc::new(TokioScheduler),
            parser,
            42,
        )
    }

    fn no_match_route() -> Route {
        Route {
            matcher: RouteMatch { path: PathMatcher::Exact { value: "/no/match".into(), case_sensitive: true }, headers: vec![], fraction: None },
            action: RouteAction::Cluster { name: "unused".into(), timeout: None, hash_policies: vec![], retry_policy: None },
            filter_overrides: Arc::new(FilterOverrideMap::new()),
        }
    }

    fn cluster_route(name: &str, timeout: Option<Duration>) -> Route {
        Route {
            matcher: RouteMatch { path: PathMatcher::Prefix { value: "/svc".into(), case_sensitive: true }, headers: vec![], fraction: None },
            action: RouteAction::Cluster { name: name.into(), timeout, hash_policies: vec![], retry_policy: None },
            filter_overrides: Arc::new(FilterOverrideMap::new()),
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderIndex {
        HeaderIndex::build(pairs.iter().map(|(k, v)| (k.to_string(), vec![v.to_string()])))
    }

    #[test]
    fn no_matching_route_is_unavailable_error() {
        let cluster_table = table();
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![no_match_route()]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table, Arc::new(PassthroughParser));
        let idx = headers(&[]);
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Error(status) => assert_eq!(status.code(), tonic::Code::Unavailable),
            SelectOutcome::Success(_) => panic!("expected no-route error"),
        }
    }

    #[test]
    fn lame_filter_chain_fails_every_call_without_retaining() {
        let cluster_table = table();
        let chain = vec![NamedFilterConfig { name: "lame".into(), config: FilterConfig::Lame }];
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![]),
            filter_chain: Some(Arc::new(chain)),
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table.clone(), Arc::new(PassthroughParser));
        let idx = headers(&[]);
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Success(selected) => {
                assert_eq!(selected.interceptors.len(), 1);
                assert!(matches!(selected.interceptors[0].start_call(), CallStart::Aborted(_)));
            }
            SelectOutcome::Error(_) => panic!("lame chain still returns success with a failing interceptor"),
        }
        assert_eq!(cluster_table.snapshot().len(), 0);
    }

    #[test]
    fn successful_selection_retains_cluster_and_emits_timeout_config() {
        let cluster_table = table();
        cluster_table.apply_membership(&["cluster-a".to_string()], &[]);
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![cluster_route("cluster-a", Some(Duration::new(2, 0)))]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table.clone(), Arc::new(PassthroughParser));
        let idx = headers(&[]);
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Success(selected) => {
                assert_eq!(selected.call_options.cluster, "cluster-a");
                assert_eq!(selected.parsed_service_config["methodConfig"][0]["timeout"], "2.000000000s");
                assert_eq!(cluster_table.snapshot().get("cluster-a"), Some(&2));
                selected.cluster_guard.release();
                assert_eq!(cluster_table.snapshot().get("cluster-a"), Some(&1));
            }
            SelectOutcome::Error(status) => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn timeout_config_presence_matches_the_latched_enable_flag() {
        // `config::enable_timeouts` latches its `OnceCell` on first call for
        // the life of the test binary, so this asserts against whatever
        // that latched value actually is rather than fighting the latch by
        // mutating the environment variable mid-run.
        let enabled = config::enable_timeouts();
        let cluster_table = table();
        cluster_table.apply_membership(&["cluster-a".to_string()], &[]);
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![cluster_route("cluster-a", Some(Duration::new(2, 0)))]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table, Arc::new(PassthroughParser));
        let idx = headers(&[]);
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Success(selected) => {
                if enabled {
                    assert_eq!(selected.parsed_service_config["methodConfig"][0]["timeout"], "2.000000000s");
                } else {
                    assert_eq!(*selected.parsed_service_config, serde_json::json!({}));
                }
            }
            SelectOutcome::Error(status) => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn parser_failure_releases_cluster_and_augments_message() {
        let cluster_table = table();
        cluster_table.apply_membership(&["cluster-a".to_string()], &[]);
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![cluster_route("cluster-a", None)]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table.clone(), Arc::new(FailingParser));
        let idx = headers(&[]);
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Error(status) => {
                assert!(status.message().contains("method config"));
                assert!(status.message().contains("synthetic parser failure"));
            }
            SelectOutcome::Success(_) => panic!("expected parser failure"),
        }
        // Membership contribution (1) remains; the failed call's retain was released.
        assert_eq!(cluster_table.snapshot().get("cluster-a"), Some(&1));
    }

    #[test]
    fn weighted_cluster_selection_respects_draw_and_cumulative_weights() {
        let cluster_table = table();
        cluster_table.apply_membership(&["a".to_string(), "b".to_string()], &[]);
        let route = Route {
            matcher: RouteMatch { path: PathMatcher::Prefix { value: "/svc".into(), case_sensitive: true }, headers: vec![], fraction: None },
            action: RouteAction::WeightedClusters {
                clusters: vec![
                    ClusterWeight { name: "a".into(), weight: 30, filter_overrides: Arc::new(FilterOverrideMap::new()) },
                    ClusterWeight { name: "b".into(), weight: 70, filter_overrides: Arc::new(FilterOverrideMap::new()) },
                ],
                timeout: None,
                hash_policies: vec![],
                retry_policy: None,
            },
            filter_overrides: Arc::new(FilterOverrideMap::new()),
        };
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![route]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table, Arc::new(PassthroughParser));
        let idx = headers(&[]);

        // `bound == 100` is the weighted-pick draw; any other bound is the
        // random RPC-hash fallback this route's empty `hash_policies` falls
        // through to, which this test does not care about.
        match selector.select("/svc/Method", &idx, &mut |bound| if bound == 100 { 50 } else { 0 }) {
            SelectOutcome::Success(selected) => assert_eq!(selected.call_options.cluster, "b"),
            SelectOutcome::Error(status) => panic!("unexpected error: {status}"),
        }
    }

    #[test]
    fn terminal_header_hash_policy_short_circuits() {
        let cluster_table = table();
        cluster_table.apply_membership(&["cluster-a".to_string()], &[]);
        let mut route = cluster_route("cluster-a", None);
        route.action = RouteAction::Cluster {
            name: "cluster-a".into(),
            timeout: None,
            hash_policies: vec![
                crate::model::HashPolicy::Header { name: "x-key".into(), regex_rewrite: None, terminal: true },
                crate::model::HashPolicy::ChannelId { terminal: false },
            ],
            retry_policy: None,
        };
        let routing = RoutingConfig {
            fallback_timeout: None,
            routes: Arc::new(vec![route]),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        };
        let selector = selector_with(routing, cluster_table, Arc::new(PassthroughParser));
        let idx = headers(&[("x-key", "value")]);
        let expected = rotate_left_1(0) ^ hash_ascii_string("value");
        match selector.select("/svc/Method", &idx, &mut |_| 0) {
            SelectOutcome::Success(selected) => assert_eq!(selected.call_options.rpc_hash, expected),
            SelectOutcome::Error(status) => panic!("unexpected error: {status}"),
        }
    }
}
