//! # Filter Registry
//!
//! A `FilterRegistry` maps filter-type names to filter implementations,
//! registered once at resolver construction (section 4.C). The only
//! concrete filter in scope is the fault filter; everything else in a
//! filter chain is surfaced to callers as `FilterConfig::Other` and simply
//! ignored by interceptor assembly.

pub mod fault;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::matchers::HeaderIndex;
use crate::model::FilterConfig;

/// What a `ClientInterceptor` decided for one call, before the RPC is
/// allowed to start.
pub enum CallStart {
    /// No fault applies; the call proceeds untouched.
    Continue,
    /// The call is aborted immediately, with no delay.
    Aborted(tonic::Status),
    /// A delay was scheduled on the provided `Scheduler`. `abort` resolves
    /// once the delay elapses, carrying `Some(status)` if an abort should
    /// then be delivered, or `None` if the call should simply proceed.
    /// Dropping (or explicitly cancelling) `cancel` before the delay
    /// elapses cancels the scheduled task and releases the active-fault
    /// slot without ever sending on `abort`.
    Deferred { abort: tokio::sync::oneshot::Receiver<Option<tonic::Status>>, cancel: ScheduledHandle },
}

/// A per-call interceptor built by a `Filter` for one RPC. The core ships
/// exactly one concrete implementation (`fault::FaultInterceptor`); other
/// filter types in a chain simply contribute no interceptor.
pub trait ClientInterceptor: Send + Sync {
    fn start_call(&self) -> CallStart;
}

/// Abstraction over "run this after a delay, cancellably" so the fault
/// filter's delay/abort sequencing is testable without real wall-clock
/// waits. The core's production implementation (`TokioScheduler`) backs
/// this with `tokio::time::sleep` plus a `CancellationToken`.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> ScheduledHandle;
}

/// A cancellation handle for one scheduled task. Cancelling after the
/// task has already run is a no-op.
pub struct ScheduledHandle {
    token: CancellationToken,
}

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Schedules onto the current Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> ScheduledHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => task(),
                _ = child.cancelled() => {}
            }
        });
        ScheduledHandle { token }
    }
}

/// What goes into building a per-call interceptor: the merged filter
/// config for this call (already resolved through the `virtualHost ->
/// route -> weightedCluster` override chain, section 4.E step 5) and the
/// request's header index.
pub struct PickArgs<'a> {
    pub headers: &'a HeaderIndex,
    pub rng: &'a mut dyn FnMut(u32) -> u32,
}

/// A registered filter type. Only filters that implement the
/// client-interceptor-builder capability return `Some` from `build`;
/// filter types present in a chain but not registered (or registered
/// without this capability) contribute no interceptor.
pub trait Filter: Send + Sync {
    fn build(
        &self,
        config: &FilterConfig,
        pick_args: PickArgs<'_>,
        scheduler: &Arc<dyn Scheduler>,
    ) -> Option<Arc<dyn ClientInterceptor>>;
}

/// Maps filter-type names (as carried by `NamedFilterConfig::name`) to
/// implementations. Construction-time only; never mutated once the
/// resolver is running.
#[derive(Default)]
pub struct FilterRegistry {
    filters: std::collections::HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the fault filter under its
    /// conventional name.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("envoy.filters.http.fault", Arc::new(fault::FaultFilter::new()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        self.filters.insert(name.into(), filter);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(name)
    }
}
