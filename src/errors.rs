//! # Error Handling
//!
//! Error types for the xDS name resolver core, following the same
//! `thiserror`-derived, constructor-per-variant shape used across the rest
//! of this codebase's xDS-facing crates.

use tonic::{Code, Status};

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors raised by the resolver core.
///
/// Every variant maps to one of the failure kinds enumerated in the
/// resolver's error-handling design: bootstrap/init, resource-not-found
/// (not actually an error, handled separately), transport, per-call routing,
/// service-config parsing, and filter-chain configuration.
#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    /// The route-discovery watcher machine could not resolve a virtual host,
    /// a route, or the effective filter chain for an update.
    #[error("Route resolution error: {message}")]
    Route { message: String },

    /// `ServiceConfigParser` rejected the JSON emitted by the config
    /// selector (timeout service config or cluster-manager service config).
    #[error("Failed to parse service config: {message}")]
    ServiceConfig {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A filter chain is missing a router filter, or references a filter
    /// type the registry does not recognize.
    #[error("Filter chain error: {message}")]
    FilterChain { message: String },

    /// A hostname or domain pattern failed the matcher's validation rules
    /// (empty, or leading/trailing '.').
    #[error("Invalid hostname pattern: {message}")]
    Hostname { message: String },

    /// Transport-level failure surfaced by the external `XdsClient` (LDS or
    /// RDS). Carries the original status so it can be forwarded verbatim.
    #[error("xDS transport error: {0}")]
    Transport(Status),

    /// Anything else: programming errors, invariant violations.
    #[error("Internal resolver error: {message}")]
    Internal { message: String },
}

impl ResolverError {
    pub fn route<S: Into<String>>(message: S) -> Self {
        Self::Route { message: message.into() }
    }

    pub fn service_config<S: Into<String>>(message: S) -> Self {
        Self::ServiceConfig { message: message.into(), source: None }
    }

    pub fn service_config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::ServiceConfig { message: message.into(), source: Some(source) }
    }

    pub fn filter_chain<S: Into<String>>(message: S) -> Self {
        Self::FilterChain { message: message.into() }
    }

    pub fn hostname<S: Into<String>>(message: S) -> Self {
        Self::Hostname { message: message.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Project this error onto the `Status` delivered to the downstream
    /// listener. Route and filter-chain failures are `UNAVAILABLE`, per
    /// section 7; transport errors pass their original status through
    /// unchanged.
    pub fn to_status(&self) -> Status {
        match self {
            ResolverError::Route { message } => Status::new(Code::Unavailable, message.clone()),
            ResolverError::ServiceConfig { message, .. } => {
                Status::new(Code::Unavailable, format!("Failed to parse service config: {message}"))
            }
            ResolverError::FilterChain { message } => {
                Status::new(Code::Unavailable, message.clone())
            }
            ResolverError::Hostname { message } => {
                Status::new(Code::InvalidArgument, message.clone())
            }
            ResolverError::Transport(status) => status.clone(),
            ResolverError::Internal { message } => Status::new(Code::Internal, message.clone()),
        }
    }
}

impl From<Status> for ResolverError {
    fn from(status: Status) -> Self {
        Self::Transport(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_error_is_unavailable() {
        let err = ResolverError::route("Could not find xDS route matching RPC");
        let status = err.to_status();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "Could not find xDS route matching RPC");
    }

    #[test]
    fn transport_error_passes_through() {
        let original = Status::new(Code::Unavailable, "upstream down");
        let err: ResolverError = original.clone().into();
        let status = err.to_status();
        assert_eq!(status.code(), original.code());
        assert_eq!(status.message(), original.message());
    }

    #[test]
    fn service_config_error_wraps_message() {
        let err = ResolverError::service_config("missing timeout field");
        assert_eq!(
            err.to_status().message(),
            "Failed to parse service config: missing timeout field"
        );
    }
}
