//! Orka store: the authoritative in-RAM catalog plus the in-flight streaming view.
//!
//! The store is mutated only by the sync orchestrator. Readers take the
//! shared side of one `RwLock`; the streaming snapshot is published through
//! `ArcSwap` so queries never wait on a collector.

#![forbid(unsafe_code)]

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use orka_core::{ObjectSummary, ResourceDescriptor};

mod streaming;

pub use streaming::{
    ReadyReceiver, ReadyUpdate, StreamingAggregator, StreamingChunk, StreamingSnapshot, StreamingSubscription,
    Unsubscribe,
};
use streaming::Subscribers;

/// Point-in-time copy of the store contents.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub items: FxHashMap<String, ObjectSummary>,
    pub last_seen: FxHashMap<String, DateTime<Utc>>,
    pub resources: FxHashMap<String, ResourceDescriptor>,
    by_resource: FxHashMap<String, FxHashSet<String>>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries owned by one descriptor identity.
    pub fn entries_for<'a>(&'a self, identity: &str) -> impl Iterator<Item = &'a ObjectSummary> + 'a {
        self.by_resource
            .get(identity)
            .into_iter()
            .flat_map(|keys| keys.iter())
            .filter_map(move |k| self.items.get(k))
    }

    fn insert(&mut self, key: String, summary: ObjectSummary, seen: DateTime<Utc>) {
        self.by_resource.entry(summary.identity()).or_default().insert(key.clone());
        self.last_seen.insert(key.clone(), seen);
        self.items.insert(key, summary);
    }

    fn remove_resource_entries(&mut self, identity: &str) -> usize {
        let Some(keys) = self.by_resource.remove(identity) else { return 0 };
        for k in keys.iter() {
            self.items.remove(k);
            self.last_seen.remove(k);
        }
        keys.len()
    }
}

/// What one cycle hands to [`CatalogStore::merge`].
pub struct CycleMerge<'a> {
    /// Every descriptor discovered this cycle.
    pub descriptors: &'a [ResourceDescriptor],
    pub disallowed: &'a [ResourceDescriptor],
    pub succeeded: Vec<(ResourceDescriptor, Vec<ObjectSummary>)>,
    pub failed: &'a [ResourceDescriptor],
    /// Store contents captured before the cycle started.
    pub prior: &'a StoreSnapshot,
    pub stamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub purged: usize,
    pub replaced: usize,
    pub restored: usize,
}

#[derive(Default)]
struct StoreState {
    data: StoreSnapshot,
    /// Identities discovered by the most recent merge.
    current: FxHashSet<String>,
    namespaces: Option<Arc<Vec<String>>>,
    kinds: Option<Arc<Vec<String>>>,
}

impl StoreState {
    fn invalidate(&mut self) {
        self.namespaces = None;
        self.kinds = None;
    }
}

pub struct CatalogStore {
    state: RwLock<StoreState>,
    streaming: ArcSwapOption<StreamingSnapshot>,
    subscribers: Arc<Subscribers>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStore {
    pub fn new() -> Self {
        Self { state: RwLock::new(StoreState::default()), streaming: ArcSwapOption::empty(), subscribers: Arc::new(Subscribers::default()) }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read().data.clone()
    }

    /// Clone out the entries accepted by `pred`, scanning under the read lock.
    pub fn collect_matching<F>(&self, mut pred: F) -> Vec<ObjectSummary>
    where
        F: FnMut(&ObjectSummary) -> bool,
    {
        self.read().data.items.values().filter(|s| pred(s)).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().data.items.len()
    }

    /// Known descriptors ordered by group, version, resource, kind.
    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let mut out: Vec<ResourceDescriptor> = self.read().data.resources.values().cloned().collect();
        out.sort_by(|a, b| a.catalog_cmp(b));
        out
    }

    /// Sorted distinct namespaces of namespaced entries. Cached until the next mutation.
    pub fn namespaces(&self) -> Arc<Vec<String>> {
        if let Some(ns) = self.read().namespaces.clone() {
            return ns;
        }
        let mut st = self.write();
        if let Some(ns) = st.namespaces.clone() {
            return ns;
        }
        let mut set: Vec<String> = st
            .data
            .items
            .values()
            .filter(|s| !s.namespace.is_empty())
            .map(|s| s.namespace.clone())
            .collect::<FxHashSet<_>>()
            .into_iter()
            .collect();
        set.sort();
        let ns = Arc::new(set);
        st.namespaces = Some(ns.clone());
        ns
    }

    /// Sorted distinct kind names. Cached until the next mutation.
    pub fn kinds(&self) -> Arc<Vec<String>> {
        if let Some(k) = self.read().kinds.clone() {
            return k;
        }
        let mut st = self.write();
        if let Some(k) = st.kinds.clone() {
            return k;
        }
        let mut set: Vec<String> = st.data.items.values().map(|s| s.kind.clone()).collect::<FxHashSet<_>>().into_iter().collect();
        set.sort();
        let k = Arc::new(set);
        st.kinds = Some(k.clone());
        k
    }

    /// Drop everything, including the streaming view.
    pub fn clear(&self) {
        {
            let mut st = self.write();
            *st = StoreState::default();
        }
        self.clear_streaming();
        debug!("store: cleared");
    }

    /// Apply one cycle: purge disallowed, replace succeeded, restore failed.
    pub fn merge(&self, m: CycleMerge<'_>) -> MergeStats {
        let mut stats = MergeStats::default();
        let mut st = self.write();
        st.current = m.descriptors.iter().map(|d| d.identity()).collect();
        for d in m.descriptors {
            st.data.resources.insert(d.identity(), d.clone());
        }

        for d in m.disallowed {
            let id = d.identity();
            stats.purged += st.data.remove_resource_entries(&id);
            st.data.resources.remove(&id);
            st.current.remove(&id);
        }

        for (d, items) in m.succeeded {
            st.data.remove_resource_entries(&d.identity());
            for s in items {
                let key = s.key();
                st.data.insert(key, s, m.stamp);
                stats.replaced += 1;
            }
        }

        for d in m.failed {
            let id = d.identity();
            st.data.remove_resource_entries(&id);
            if let Some(keys) = m.prior.by_resource.get(&id) {
                for k in keys.iter() {
                    if let Some(s) = m.prior.items.get(k) {
                        let seen = m.prior.last_seen.get(k).copied().unwrap_or(m.stamp);
                        st.data.insert(k.clone(), s.clone(), seen);
                        stats.restored += 1;
                    }
                }
            }
        }
        st.invalidate();
        debug!(purged = stats.purged, replaced = stats.replaced, restored = stats.restored, items = st.data.items.len(), "store: merged");
        stats
    }

    /// Remove entries not seen within `ttl` of `now`, then forget descriptors
    /// from earlier cycles that no longer own any entry.
    pub fn evict_expired(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> usize {
        let cutoff = now - ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        let mut st = self.write();
        let expired: Vec<String> = st.data.last_seen.iter().filter(|(_, seen)| **seen < cutoff).map(|(k, _)| k.clone()).collect();
        for k in expired.iter() {
            st.data.last_seen.remove(k);
            if let Some(s) = st.data.items.remove(k) {
                let id = s.identity();
                if let Some(keys) = st.data.by_resource.get_mut(&id) {
                    keys.remove(k);
                    if keys.is_empty() {
                        st.data.by_resource.remove(&id);
                    }
                }
            }
        }
        let state = &mut *st;
        let current = &state.current;
        let owned = &state.data.by_resource;
        state.data.resources.retain(|id, _| current.contains(id) || owned.contains_key(id));
        if !expired.is_empty() {
            st.invalidate();
            debug!(evicted = expired.len(), "store: evicted expired entries");
        }
        expired.len()
    }

    /// In-flight view of the running cycle, if any.
    pub fn streaming(&self) -> Option<Arc<StreamingSnapshot>> {
        self.streaming.load_full()
    }

    pub fn publish_streaming(&self, snap: Arc<StreamingSnapshot>) {
        self.swap_streaming(snap);
        self.notify_streaming();
    }

    pub(crate) fn swap_streaming(&self, snap: Arc<StreamingSnapshot>) {
        self.streaming.store(Some(snap));
    }

    /// Push the readiness of the view published last to every subscriber.
    pub(crate) fn notify_streaming(&self) {
        self.subscribers.notify(self.ready_update());
    }

    fn ready_update(&self) -> ReadyUpdate {
        self.streaming
            .load()
            .as_ref()
            .map(|s| ReadyUpdate { ready: s.ready, chunks: s.chunks.len(), items: s.item_count })
            .unwrap_or_default()
    }

    pub fn clear_streaming(&self) {
        self.streaming.store(None);
        self.notify_streaming();
    }

    /// Replace the streaming view with one chunk holding the whole store.
    pub fn rebuild_streaming(&self, ready: bool) {
        let items: Vec<ObjectSummary> = self.read().data.items.values().cloned().collect();
        let snap = StreamingSnapshot::from_items(items, ready, Utc::now());
        self.publish_streaming(Arc::new(snap));
    }

    /// Subscribe to readiness transitions of the streaming view. The current
    /// readiness is delivered immediately.
    pub fn subscribe_streaming(&self) -> StreamingSubscription {
        Subscribers::subscribe(&self.subscribers, self.ready_update())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
