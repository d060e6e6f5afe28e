//! # Structured Logging
//!
//! The resolver core logs resolve-state transitions and per-call routing
//! decisions through `tracing`. It does not install a subscriber itself —
//! that is the host binary's job, the same way the wider control plane's
//! logging module only provides span/macro helpers and leaves
//! `tracing_subscriber::fmt()` to the binary crate.

/// Span covering one LDS or RDS watcher callback, from re-entering the
/// synchronization context through the resulting state transition.
#[macro_export]
macro_rules! watcher_span {
    ($kind:expr, $name:expr) => {
        tracing::info_span!("xds_watcher_callback", resource_kind = %$kind, resource_name = %$name)
    };
}

/// Span covering one config-selector attempt (route match through cluster
/// retain). Kept at debug level — this runs on every outgoing call.
#[macro_export]
macro_rules! select_span {
    ($method:expr) => {
        tracing::debug_span!("xds_config_select", method = %$method)
    };
}
