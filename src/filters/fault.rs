//! # Fault Filter
//!
//! HTTP fault injection (section 4.C): per-call delay and/or abort,
//! fixed or header-driven, gated by a max-active-faults ceiling shared
//! across every call the filter instance handles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonic::{Code, Status};

use crate::matchers::fraction::fires;
use crate::matchers::HeaderIndex;
use crate::model::{FaultAbort, FaultConfig, FaultDelay, FilterConfig, FractionalPercent};

use super::{CallStart, ClientInterceptor, Filter, PickArgs, Scheduler, TokioScheduler};

const HDR_ABORT_HTTP_STATUS: &str = "x-envoy-fault-abort-request";
const HDR_ABORT_GRPC_STATUS: &str = "x-envoy-fault-abort-grpc-request";
const HDR_ABORT_PERCENTAGE: &str = "x-envoy-fault-abort-request-percentage";
const HDR_DELAY_MILLIS: &str = "x-envoy-fault-delay-request";
const HDR_DELAY_PERCENTAGE: &str = "x-envoy-fault-delay-request-percentage";

/// Stateful per-instance fault filter: one `activeFaults` counter shared
/// by every call this filter instance handles, per the filter chain it is
/// registered into (section 4.C).
pub struct FaultFilter {
    active_faults: Arc<AtomicU64>,
}

impl Default for FaultFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultFilter {
    pub fn new() -> Self {
        Self { active_faults: Arc::new(AtomicU64::new(0)) }
    }

    pub fn active_faults(&self) -> u64 {
        self.active_faults.load(Ordering::SeqCst)
    }

    /// Computes the delay and/or abort this call should receive, if any,
    /// and reserves an active-fault slot for it. Returns `None` when the
    /// gate is closed or neither fault fires.
    fn evaluate(
        &self,
        config: &FaultConfig,
        headers: &HeaderIndex,
        rng: &mut dyn FnMut(u32) -> u32,
    ) -> Option<(Option<Duration>, Option<Status>, FaultGuard)> {
        if let Some(max) = config.max_active_faults {
            if self.active_faults.load(Ordering::SeqCst) >= max {
                tracing::trace!(max, "fault gate closed, call proceeds untouched");
                return None;
            }
        }

        let delay = config.delay.as_ref().and_then(|d| resolve_delay(d, headers, rng));
        let abort = config.abort.as_ref().and_then(|a| resolve_abort(a, headers, rng));
        if delay.is_none() && abort.is_none() {
            return None;
        }

        tracing::trace!(delay_ms = delay.map(|d| d.as_millis()), abort = abort.is_some(), "fault fires");
        self.active_faults.fetch_add(1, Ordering::SeqCst);
        let guard = FaultGuard { active_faults: self.active_faults.clone(), resolved: Arc::new(AtomicBool::new(false)) };
        Some((delay, abort, guard))
    }
}

impl Filter for FaultFilter {
    fn build(
        &self,
        config: &FilterConfig,
        pick_args: PickArgs<'_>,
        scheduler: &Arc<dyn Scheduler>,
    ) -> Option<Arc<dyn ClientInterceptor>> {
        let FilterConfig::Fault(fault_config) = config else { return None };
        let (delay, abort, guard) = self.evaluate(fault_config, pick_args.headers, pick_args.rng)?;
        Some(Arc::new(FaultInterceptor { delay, abort, guard: Some(guard), scheduler: scheduler.clone() }))
    }
}

/// Releases its `activeFaults` slot exactly once: on delay elapsing, on
/// abort delivery, or on early drop (call cancelled mid-delay).
struct FaultGuard {
    active_faults: Arc<AtomicU64>,
    resolved: Arc<AtomicBool>,
}

impl FaultGuard {
    fn resolve(&self) {
        if !self.resolved.swap(true, Ordering::SeqCst) {
            self.active_faults.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        self.resolve();
    }
}

struct FaultInterceptor {
    delay: Option<Duration>,
    abort: Option<Status>,
    guard: Option<FaultGuard>,
    scheduler: Arc<dyn Scheduler>,
}

impl ClientInterceptor for FaultInterceptor {
    fn start_call(&self) -> CallStart {
        let guard = self.guard.as_ref().expect("start_call is invoked once per interceptor");
        match self.delay {
            None => {
                guard.resolve();
                match &self.abort {
                    Some(status) => CallStart::Aborted(status.clone()),
                    None => CallStart::Continue,
                }
            }
            Some(delay) => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                let abort = self.abort.clone();
                let active_faults = guard.active_faults.clone();
                let resolved = guard.resolved.clone();
                let cancel = self.scheduler.schedule(
                    delay,
                    Box::new(move || {
                        if !resolved.swap(true, Ordering::SeqCst) {
                            active_faults.fetch_sub(1, Ordering::SeqCst);
                        }
                        let _ = tx.send(abort);
                    }),
                );
                CallStart::Deferred { abort: rx, cancel }
            }
        }
    }
}

impl Drop for FaultInterceptor {
    fn drop(&mut self) {
        // Dropping a still-delayed interceptor without the call having
        // consumed its `Deferred` arm (e.g. the call was cancelled before
        // start_call was ever read) must still release the slot.
        if let Some(guard) = self.guard.take() {
            guard.resolve();
        }
    }
}

fn resolve_delay(config: &FaultDelay, headers: &HeaderIndex, rng: &mut dyn FnMut(u32) -> u32) -> Option<Duration> {
    match config {
        FaultDelay::Fixed { delay, percent } => fires(*percent, rng).then_some(*delay),
        FaultDelay::HeaderDriven { cap_percent } => {
            let header_percent = parse_u32(headers.get(HDR_DELAY_PERCENTAGE))?;
            let effective = capped_percent(header_percent, *cap_percent);
            if !fires(effective, rng) {
                return None;
            }
            let millis = parse_u64(headers.get(HDR_DELAY_MILLIS))?;
            Some(Duration::from_millis(millis))
        }
    }
}

fn resolve_abort(config: &FaultAbort, headers: &HeaderIndex, rng: &mut dyn FnMut(u32) -> u32) -> Option<Status> {
    match config {
        FaultAbort::Fixed { status, percent } => fires(*percent, rng).then(|| status.clone()),
        FaultAbort::HeaderDriven { cap_percent } => {
            let header_percent = parse_u32(headers.get(HDR_ABORT_PERCENTAGE))?;
            let effective = capped_percent(header_percent, *cap_percent);
            if !fires(effective, rng) {
                return None;
            }
            header_driven_abort_status(headers)
        }
    }
}

/// HTTP status header takes precedence over the grpc-status header
/// (section 4.C, 6).
fn header_driven_abort_status(headers: &HeaderIndex) -> Option<Status> {
    if let Some(http_status) = parse_u32(headers.get(HDR_ABORT_HTTP_STATUS)) {
        return Some(Status::new(Code::Unimplemented, format!("HTTP status code {http_status}")));
    }
    let grpc_code = parse_u32(headers.get(HDR_ABORT_GRPC_STATUS))?;
    Some(Status::new(Code::from_i32(grpc_code as i32), ""))
}

fn capped_percent(header_percent: u32, cap: FractionalPercent) -> FractionalPercent {
    FractionalPercent { numerator: header_percent.min(cap.numerator), denominator: cap.denominator }
}

fn parse_u32(value: Option<&str>) -> Option<u32> {
    value?.parse().ok()
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value?.parse().ok()
}
