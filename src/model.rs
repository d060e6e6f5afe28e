//! # Resource Model
//!
//! Immutable value types produced by the (out-of-scope) xDS layer and
//! consumed by the resolve-state watcher machine and the config selector.
//! Nothing in this module performs I/O or talks to a control plane; it is
//! the normalized shape the core operates on once LDS/RDS updates have
//! already been parsed.

use std::sync::Arc;
use std::time::Duration;

use crate::matchers::{FractionMatcher, HeaderMatch, PathMatcher};

/// One virtual host: a routable logical origin selected by domain pattern.
#[derive(Debug, Clone)]
pub struct VirtualHost {
    pub name: String,
    /// Domain patterns in the order the xDS layer returned them (exact,
    /// `*`, `prefix.*`, or `*.suffix`).
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
    /// Per-filter override configuration keyed by filter instance name.
    pub filter_overrides: Arc<FilterOverrideMap>,
}

/// A `(match, action)` pair plus per-route filter overrides.
#[derive(Debug, Clone)]
pub struct Route {
    pub matcher: RouteMatch,
    pub action: RouteAction,
    pub filter_overrides: Arc<FilterOverrideMap>,
}

/// Everything that must hold for a request to select this route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub path: PathMatcher,
    pub headers: Vec<HeaderMatch>,
    pub fraction: Option<FractionMatcher>,
}

impl RouteMatch {
    /// Path matches, AND all header matchers match, AND the fraction
    /// matcher (if any) matches. `rng` supplies the uniform draw for the
    /// fraction matcher.
    pub fn matches(&self, method: &str, headers: &crate::matchers::HeaderIndex, rng: &mut dyn FnMut(u32) -> u32) -> bool {
        if !self.path.matches(method) {
            return false;
        }
        if !self.headers.iter().all(|h| h.matches(headers)) {
            return false;
        }
        match &self.fraction {
            Some(fraction) => fraction.matches(rng),
            None => true,
        }
    }
}

/// Either a single cluster or a weighted list; never both (upheld by the
/// xDS layer that constructs this value, not re-validated here).
#[derive(Debug, Clone)]
pub enum RouteAction {
    Cluster {
        name: String,
        timeout: Option<Duration>,
        hash_policies: Vec<HashPolicy>,
        retry_policy: Option<RetryPolicy>,
    },
    WeightedClusters {
        clusters: Vec<ClusterWeight>,
        timeout: Option<Duration>,
        hash_policies: Vec<HashPolicy>,
        retry_policy: Option<RetryPolicy>,
    },
}

impl RouteAction {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            RouteAction::Cluster { timeout, .. } => *timeout,
            RouteAction::WeightedClusters { timeout, .. } => *timeout,
        }
    }

    pub fn hash_policies(&self) -> &[HashPolicy] {
        match self {
            RouteAction::Cluster { hash_policies, .. } => hash_policies,
            RouteAction::WeightedClusters { hash_policies, .. } => hash_policies,
        }
    }

    /// All cluster names this action can resolve to: the single cluster,
    /// or every weighted-cluster name.
    pub fn cluster_names(&self) -> Vec<&str> {
        match self {
            RouteAction::Cluster { name, .. } => vec![name.as_str()],
            RouteAction::WeightedClusters { clusters, .. } => {
                clusters.iter().map(|c| c.name.as_str()).collect()
            }
        }
    }
}

/// One entry of a weighted-cluster route action.
#[derive(Debug, Clone)]
pub struct ClusterWeight {
    pub name: String,
    pub weight: u32,
    pub filter_overrides: Arc<FilterOverrideMap>,
}

/// Per-route consistent-hash input. Evaluated in order; a terminal policy
/// that produced a hash short-circuits the remaining policies.
#[derive(Debug, Clone)]
pub enum HashPolicy {
    Header {
        name: String,
        /// Optional `(pattern, substitution)` applied to the header value
        /// before hashing, replacing every match (`Regex::replace_all`).
        regex_rewrite: Option<(Arc<regex::Regex>, String)>,
        terminal: bool,
    },
    ChannelId { terminal: bool },
}

impl HashPolicy {
    pub fn is_terminal(&self) -> bool {
        match self {
            HashPolicy::Header { terminal, .. } => *terminal,
            HashPolicy::ChannelId { terminal } => *terminal,
        }
    }
}

/// Retry policy carried on a route action. The core does not interpret
/// this — it is surfaced so a filter or host channel can act on it.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retriable_status_codes: Vec<u32>,
    pub per_try_timeout: Option<Duration>,
}

/// Denominator for a `FractionalPercent`, matching the three xDS-defined
/// scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FractionDenominator {
    Hundred,
    TenThousand,
    Million,
}

impl FractionDenominator {
    pub fn value(self) -> u32 {
        match self {
            FractionDenominator::Hundred => 100,
            FractionDenominator::TenThousand => 10_000,
            FractionDenominator::Million => 1_000_000,
        }
    }
}

/// Numerator/denominator pair used by both route fraction matching and
/// fault injection rates.
#[derive(Debug, Clone, Copy)]
pub struct FractionalPercent {
    pub numerator: u32,
    pub denominator: FractionDenominator,
}

/// A fixed or header-driven fault value paired with its firing rate.
#[derive(Debug, Clone)]
pub enum FaultDelay {
    Fixed { delay: Duration, percent: FractionalPercent },
    HeaderDriven { cap_percent: FractionalPercent },
}

#[derive(Debug, Clone)]
pub enum FaultAbort {
    Fixed { status: tonic::Status, percent: FractionalPercent },
    HeaderDriven { cap_percent: FractionalPercent },
}

/// HTTP fault-injection configuration for a filter instance.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub delay: Option<FaultDelay>,
    pub abort: Option<FaultAbort>,
    pub max_active_faults: Option<u64>,
}

/// A single entry of an HTTP filter chain: a filter type name plus its
/// base configuration.
#[derive(Debug, Clone)]
pub struct NamedFilterConfig {
    pub name: String,
    pub config: FilterConfig,
}

/// The only concrete filter config this crate ships, plus a catch-all for
/// filter types the registry does not recognize (still modeled so an
/// unrecognized-but-present filter in the chain round-trips rather than
/// panicking).
#[derive(Debug, Clone)]
pub enum FilterConfig {
    Fault(FaultConfig),
    Router,
    /// Sentinel marking "no router filter present" (section 4.E/4.F).
    Lame,
    Other { type_url: String },
}

pub type FilterOverrideMap = std::collections::HashMap<String, FilterConfig>;

/// Merge per-call filter overrides in precedence order: later entries win.
/// Used for `virtualHost -> route -> weightedCluster` (section 4.E step 5).
pub fn merge_overrides(layers: &[&FilterOverrideMap]) -> FilterOverrideMap {
    let mut merged = FilterOverrideMap::new();
    for layer in layers {
        for (k, v) in layer.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Snapshot of the resolver's current routing view (section 3). Replaced
/// atomically by `ResolveState`; readers take one `ArcSwap::load` per call.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub fallback_timeout: Option<Duration>,
    /// The routes of the virtual host selected for the resolver's
    /// authority, already hostname-matched by `resolve_state`. Empty when
    /// the effective filter chain is lame (section 4.F step 2).
    pub routes: Arc<Vec<Route>>,
    /// `None` means HTTP-filter support is disabled: every route matches
    /// unconditionally and no filter chain is consulted.
    pub filter_chain: Option<Arc<Vec<NamedFilterConfig>>>,
    /// Per-filter override config of the selected virtual host.
    pub virtual_host_override: Arc<FilterOverrideMap>,
}

impl RoutingConfig {
    pub fn empty() -> Self {
        Self {
            fallback_timeout: None,
            routes: Arc::new(Vec::new()),
            filter_chain: None,
            virtual_host_override: Arc::new(FilterOverrideMap::new()),
        }
    }

    /// Whether the filter chain, if present, ends in the LAME sentinel.
    pub fn is_lame(&self) -> bool {
        match &self.filter_chain {
            Some(chain) => filter_chain_is_lame(chain),
            None => false,
        }
    }
}

/// Shared helper so resolve-state and the config selector agree on what
/// "the chain is lame" means (section F.4 of `SPEC_FULL.md`).
pub fn filter_chain_is_lame(chain: &[NamedFilterConfig]) -> bool {
    matches!(chain.last(), Some(NamedFilterConfig { config: FilterConfig::Lame, .. }))
}

/// An LDS (Listener Discovery) update, normalized to either an inline
/// route table or a pointer to an RDS resource.
#[derive(Debug, Clone)]
pub enum LdsUpdate {
    InlineRoutes {
        http_max_stream_duration: Option<Duration>,
        virtual_hosts: Arc<Vec<VirtualHost>>,
        filter_chain: Option<Arc<Vec<NamedFilterConfig>>>,
    },
    RdsPointer {
        http_max_stream_duration: Option<Duration>,
        rds_name: String,
        filter_chain: Option<Arc<Vec<NamedFilterConfig>>>,
    },
}

/// An RDS (Route Configuration Discovery) update.
#[derive(Debug, Clone)]
pub struct RdsUpdate {
    pub virtual_hosts: Arc<Vec<VirtualHost>>,
}
