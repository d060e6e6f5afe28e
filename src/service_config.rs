//! # Emitted Service Config
//!
//! Builds the two JSON shapes the resolver hands to a `ServiceConfigParser`
//! (section 6): the load-balancing config (keyed by the current cluster
//! table) and the per-call method config (timeout, when enabled and
//! positive). Pure functions; no I/O, no parsing — parsing is the
//! collaborator's job.

use std::time::Duration;

use serde_json::{json, Value};

/// `{ "loadBalancingConfig": [ { "cluster_manager_experimental": { ... } } ] }`
/// keyed by every cluster name currently in the reference table (section
/// 4.D, 6). `clusters` should already be sorted for deterministic output;
/// `ClusterRefTable::snapshot` returns a `BTreeMap` for exactly this
/// reason.
pub fn load_balancing_config<'a>(clusters: impl IntoIterator<Item = &'a str>) -> Value {
    let mut child_policy = serde_json::Map::new();
    for cluster in clusters {
        child_policy.insert(
            cluster.to_string(),
            json!({ "lbPolicy": [ { "cds_experimental": { "cluster": cluster } } ] }),
        );
    }
    json!({
        "loadBalancingConfig": [
            { "cluster_manager_experimental": { "childPolicy": child_policy } }
        ]
    })
}

/// `{ "methodConfig": [ { "name": [ {} ], "timeout": "<s>.<nnnnnnnnn>s" } ] }`,
/// or an empty object when `timeout` is `None`, zero, or negative (section
/// 4.E step 7). Caller is responsible for the `enableTimeout` gate
/// ([`crate::config::enable_timeouts`]) — this function only formats.
pub fn method_timeout_config(timeout: Option<Duration>) -> Value {
    match timeout {
        Some(d) if !d.is_zero() => {
            json!({
                "methodConfig": [
                    { "name": [ {} ], "timeout": format_timeout(d) }
                ]
            })
        }
        _ => json!({}),
    }
}

/// `<seconds>.<nanos, nine digits, zero-padded>s`, e.g. `1.000000001s`,
/// `0.500000000s`. The upstream resolver never trims trailing zeros, so
/// neither do we.
fn format_timeout(d: Duration) -> String {
    format!("{}.{:09}s", d.as_secs(), d.subsec_nanos())
}
