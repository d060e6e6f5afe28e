//! # Cluster Reference Table
//!
//! Process-local map from cluster name to a non-negative refcount
//! (section 4.D). A cluster is present in the table iff it is currently
//! selectable by some in-flight call, or named by the most recently
//! published `RoutingConfig` — the two contributions share one counter
//! (the "double accounting" in section 9), so a cluster dropped from
//! config mid-call is not evicted until every call referencing it also
//! releases it.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::sync_context::SynchronizationContext;

pub struct ClusterRefTable {
    counts: Arc<DashMap<String, i64>>,
    sync_context: SynchronizationContext,
    on_membership_changed: Arc<dyn Fn() + Send + Sync>,
}

impl ClusterRefTable {
    pub fn new(
        sync_context: SynchronizationContext,
        on_membership_changed: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self { counts: Arc::new(DashMap::new()), sync_context, on_membership_changed }
    }

    /// Atomically increments the refcount iff a nonzero entry exists.
    /// `DashMap`'s per-shard locking gives the same guarantee a manual
    /// CAS loop would: a concurrent `release` racing this call can never
    /// observe a torn read.
    pub fn retain(&self, name: &str) -> bool {
        match self.counts.get_mut(name) {
            Some(mut entry) if *entry > 0 => {
                *entry += 1;
                true
            }
            _ => false,
        }
    }

    /// Decrements atomically. If the result is zero, defers the
    /// remove-and-notify step onto the synchronization context, which
    /// re-checks the count there (a concurrent `retain` or `apply_membership`
    /// may have resurrected it) before actually removing the entry.
    pub fn release(&self, name: &str) {
        let hit_zero = match self.counts.get_mut(name) {
            Some(mut entry) => {
                *entry -= 1;
                *entry <= 0
            }
            None => {
                tracing::warn!(cluster = name, "release() on a cluster with no table entry");
                false
            }
        };
        if !hit_zero {
            return;
        }
        let counts = self.counts.clone();
        let on_change = self.on_membership_changed.clone();
        let name = name.to_string();
        self.sync_context.execute(move || {
            if counts.remove_if(&name, |_, v| *v <= 0).is_some() {
                tracing::debug!(cluster = %name, "cluster refcount reached zero, evicted");
                on_change();
            }
        });
    }

    /// Reconciles the table against a newly published route set. Must be
    /// called from within the synchronization context (by `ResolveState`
    /// during an LDS/RDS update), not dispatched itself, so that it is
    /// ordered with respect to any pending deferred removals.
    ///
    /// For every name in `new_clusters` not already present, inserts with
    /// count 1; for names present in both `new_clusters` and
    /// `previous_published`, increments by 1 (membership's share moves
    /// forward); for names only in `previous_published`, decrements by 1
    /// and removes if the result is zero. Returns whether the *set* of
    /// present cluster names changed (new insert or an eviction), which is
    /// what determines whether a new resolution result must be emitted.
    pub fn apply_membership(&self, new_clusters: &[String], previous_published: &[String]) -> bool {
        let mut changed = false;
        let new_set: HashSet<&str> = new_clusters.iter().map(String::as_str).collect();

        for name in new_clusters {
            let mut entry = self.counts.entry(name.clone()).or_insert(0);
            if *entry == 0 {
                changed = true;
            }
            *entry += 1;
        }

        for name in previous_published {
            if new_set.contains(name.as_str()) {
                continue;
            }
            let hit_zero = match self.counts.get_mut(name) {
                Some(mut entry) => {
                    *entry -= 1;
                    *entry <= 0
                }
                None => false,
            };
            if hit_zero && self.counts.remove_if(name, |_, v| *v <= 0).is_some() {
                changed = true;
            }
        }

        changed
    }

    /// Read-only snapshot for diagnostics/tests (section F.3 of
    /// `SPEC_FULL.md`); does not mutate the table.
    pub fn snapshot(&self) -> std::collections::BTreeMap<String, i64> {
        self.counts.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.counts.contains_key(name)
    }
}
