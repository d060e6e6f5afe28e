//! # xDS Name Resolver Core
//!
//! A client-side xDS name-resolution library: the LDS/RDS watcher state
//! machine, route matching, cluster reference counting, per-call hash
//! generation, and HTTP fault injection that sit behind a gRPC channel's
//! outer Name-Resolver API. Bootstrap, xDS wire transport, CDS/EDS
//! resolution, load-balancer implementations, TLS, and the service-config
//! JSON parser itself are external collaborators this crate consumes
//! through [`xds_client`], not functionality it implements.
//!
//! ## Layout
//!
//! - [`model`] — immutable resource types produced by the xDS layer
//!   (`VirtualHost`, `Route`, `RouteAction`, `FaultConfig`, ...).
//! - [`matchers`] — pure hostname/path/header/fraction predicates.
//! - [`hash`] — xxHash64 plus the rotation-based combination rule.
//! - [`sync_context`] — the serial single-writer execution queue every
//!   state mutation funnels through.
//! - [`cluster_refs`] — the cluster-name to refcount table.
//! - [`filters`] — the filter registry and the fault filter.
//! - [`resolve_state`] — the LDS/RDS watcher state machine that ties the
//!   above together into a published [`model::RoutingConfig`].
//! - [`selector`] — the per-call config-selector algorithm.
//! - [`service_config`] — the JSON shapes emitted to a
//!   [`xds_client::ServiceConfigParser`].
//! - [`xds_client`] — the external collaborator interfaces.
//! - [`config`] — process-wide feature flags.
//! - [`errors`] — this crate's error type.

pub mod cluster_refs;
pub mod config;
pub mod errors;
pub mod filters;
pub mod hash;
pub mod matchers;
pub mod model;
pub mod observability;
pub mod resolve_state;
pub mod selector;
pub mod service_config;
pub mod sync_context;
pub mod xds_client;

pub use errors::{ResolverError, Result};
pub use resolve_state::{ResolutionResult, ResolveState};
pub use selector::{ConfigSelector, SelectOutcome, SelectedCall};

/// Crate version, surfaced for diagnostics the way a host channel's own
/// version string is.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
