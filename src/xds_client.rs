//! # External Collaborators
//!
//! Interfaces the core consumes but does not implement (section 4.G):
//! bootstrap/transport (`XdsClient`), and service-config JSON validation
//! (`ServiceConfigParser`). Both are out of scope for this crate — a host
//! wires in its own implementations (over ADS, over some control plane,
//! over a JSON schema validator) and hands the core a `&dyn` reference.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::Result;
use crate::model::{LdsUpdate, RdsUpdate};

/// Callbacks fired by an `XdsClient` watch, on an arbitrary thread. The
/// resolver re-enters its own synchronization context before touching any
/// state from these (section 4.G, 5).
pub trait ResourceWatcher<T>: Send + Sync {
    fn on_changed(&self, update: T);
    fn on_error(&self, status: tonic::Status);
    fn on_resource_does_not_exist(&self, name: &str);
}

/// Subscribes to LDS and RDS resources by name. At most one LDS watch and
/// one RDS watch is active per resolver instance at any time (section
/// 4.F) — enforced by `ResolveState`, not by implementations of this
/// trait.
pub trait XdsClient: Send + Sync {
    fn watch_lds_resource(&self, name: &str, watcher: Arc<dyn ResourceWatcher<LdsUpdate>>);
    fn cancel_lds_resource_watch(&self, name: &str);
    fn watch_rds_resource(&self, name: &str, watcher: Arc<dyn ResourceWatcher<RdsUpdate>>);
    fn cancel_rds_resource_watch(&self, name: &str);
}

/// Validates and normalizes the JSON service config the config selector
/// emits (section 4.E step 7, section 6). A pure function from the
/// core's point of view; the parsed result is opaque and simply carried
/// alongside the combined interceptor.
pub trait ServiceConfigParser: Send + Sync {
    fn parse(&self, raw: &Value) -> Result<Arc<Value>>;
}
