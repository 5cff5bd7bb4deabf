//! Streaming view of an in-flight cycle and its readiness subscribers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use orka_core::{ObjectSummary, ResourceDescriptor};

use crate::CatalogStore;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// One immutable batch appended during a cycle.
#[derive(Debug, Default)]
pub struct StreamingChunk {
    pub items: Vec<ObjectSummary>,
}

#[derive(Debug, Clone)]
pub struct StreamingSnapshot {
    pub chunks: Vec<Arc<StreamingChunk>>,
    /// Sorted distinct kind names across all chunks.
    pub kinds: Vec<String>,
    /// Sorted distinct namespaces across all chunks (cluster scope excluded).
    pub namespaces: Vec<String>,
    pub ready: bool,
    pub item_count: usize,
    pub started_at: DateTime<Utc>,
}

impl StreamingSnapshot {
    pub fn from_items(items: Vec<ObjectSummary>, ready: bool, started_at: DateTime<Utc>) -> Self {
        let mut kinds = BTreeSet::new();
        let mut namespaces = BTreeSet::new();
        for s in items.iter() {
            kinds.insert(s.kind.clone());
            if !s.namespace.is_empty() {
                namespaces.insert(s.namespace.clone());
            }
        }
        let item_count = items.len();
        let chunks = if items.is_empty() { Vec::new() } else { vec![Arc::new(StreamingChunk { items })] };
        Self { chunks, kinds: kinds.into_iter().collect(), namespaces: namespaces.into_iter().collect(), ready, item_count, started_at }
    }

    pub fn items(&self) -> impl Iterator<Item = &ObjectSummary> {
        self.chunks.iter().flat_map(|c| c.items.iter())
    }
}

#[derive(Default)]
struct AggState {
    chunks: Vec<Arc<StreamingChunk>>,
    kinds: BTreeSet<String>,
    namespaces: BTreeSet<String>,
    items: usize,
}

impl AggState {
    fn snapshot(&self, ready: bool, started_at: DateTime<Utc>) -> StreamingSnapshot {
        StreamingSnapshot {
            chunks: self.chunks.clone(),
            kinds: self.kinds.iter().cloned().collect(),
            namespaces: self.namespaces.iter().cloned().collect(),
            ready,
            item_count: self.items,
            started_at,
        }
    }
}

/// Accumulates collector output for one cycle and republishes the running
/// total to the store after every batch.
pub struct StreamingAggregator {
    store: Arc<CatalogStore>,
    state: Mutex<AggState>,
    started: Instant,
    started_at: DateTime<Utc>,
    first_batch: OnceLock<Duration>,
}

impl StreamingAggregator {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store, state: Mutex::new(AggState::default()), started: Instant::now(), started_at: Utc::now(), first_batch: OnceLock::new() }
    }

    pub fn emit(&self, batch: &[ObjectSummary]) {
        if batch.is_empty() {
            return;
        }
        let mut st = lock(&self.state);
        for s in batch {
            if !st.kinds.contains(&s.kind) {
                st.kinds.insert(s.kind.clone());
            }
            if !s.namespace.is_empty() && !st.namespaces.contains(&s.namespace) {
                st.namespaces.insert(s.namespace.clone());
            }
        }
        st.items += batch.len();
        st.chunks.push(Arc::new(StreamingChunk { items: batch.to_vec() }));
        let elapsed = self.started.elapsed();
        if self.first_batch.set(elapsed).is_ok() {
            let ms = elapsed.as_secs_f64() * 1000.0;
            metrics::histogram!("catalog_first_batch_ms", ms);
            debug!(first_batch_ms = ms, items = batch.len(), "store: first streaming batch");
        }
        // Swap under the aggregator lock so snapshots land in emit order.
        self.store.swap_streaming(Arc::new(st.snapshot(false, self.started_at)));
        drop(st);
        self.store.notify_streaming();
    }

    /// Publish the final shape with readiness reflecting the cycle outcome.
    pub fn finalize(&self, descriptors: &[ResourceDescriptor], success: bool) {
        let st = lock(&self.state);
        debug!(descriptors = descriptors.len(), chunks = st.chunks.len(), items = st.items, success, "store: streaming finalized");
        self.store.swap_streaming(Arc::new(st.snapshot(success, self.started_at)));
        drop(st);
        self.store.notify_streaming();
    }

    /// Time from cycle start to the first non-empty batch.
    pub fn first_batch_latency(&self) -> Option<Duration> {
        self.first_batch.get().copied()
    }

    pub fn item_count(&self) -> usize {
        lock(&self.state).items
    }
}

/// Readiness signal pushed to streaming subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyUpdate {
    pub ready: bool,
    pub chunks: usize,
    pub items: usize,
}

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    map: Mutex<FxHashMap<u64, watch::Sender<ReadyUpdate>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(this: &Arc<Self>, current: ReadyUpdate) -> StreamingSubscription {
        let id = this.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = watch::channel(current);
        rx.mark_changed();
        lock(&this.map).insert(id, tx);
        StreamingSubscription { rx: ReadyReceiver { rx }, cancel: Unsubscribe { id, registry: Arc::downgrade(this) } }
    }

    /// Best-effort fan-out; never blocks on a slow subscriber. A ready update
    /// replaces whatever is unseen, a repeated not-ready update wakes nobody.
    pub(crate) fn notify(&self, update: ReadyUpdate) {
        let senders: Vec<watch::Sender<ReadyUpdate>> = {
            let mut map = lock(&self.map);
            map.retain(|_, tx| !tx.is_closed());
            map.values().cloned().collect()
        };
        for tx in senders.iter() {
            if update.ready {
                tx.send_replace(update);
            } else {
                tx.send_if_modified(|cur| {
                    if *cur == update {
                        return false;
                    }
                    *cur = update;
                    true
                });
            }
        }
    }

    fn remove(&self, id: u64) {
        lock(&self.map).remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.map).values().filter(|tx| !tx.is_closed()).count()
    }
}

pub struct StreamingSubscription {
    pub rx: ReadyReceiver,
    pub cancel: Unsubscribe,
}

pub struct ReadyReceiver {
    rx: watch::Receiver<ReadyUpdate>,
}

impl ReadyReceiver {
    /// Next unseen update, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<ReadyUpdate> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    pub fn try_recv(&mut self) -> Option<ReadyUpdate> {
        match self.rx.has_changed() {
            Ok(true) => Some(*self.rx.borrow_and_update()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

pub struct Unsubscribe {
    id: u64,
    registry: Weak<Subscribers>,
}

impl Unsubscribe {
    /// Idempotent; dropping the registered sender closes the paired receiver.
    pub fn unsubscribe(&self) {
        if let Some(r) = self.registry.upgrade() {
            r.remove(self.id);
        }
    }
}
