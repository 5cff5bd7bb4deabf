//! Promotion of high-cardinality kinds from repeated listing to a watch index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use orka_core::{IndexFactory, ObjectSummary, ResourceDescriptor, WatchIndex};

/// Result of reading a promoted index.
#[derive(Debug)]
pub enum PromotedRead {
    Absent,
    /// An attempt exists but its initial sync has not completed.
    NotSynced,
    Ready(Vec<ObjectSummary>),
}

struct Attempt {
    id: u64,
    index: Option<Arc<dyn WatchIndex>>,
}

pub struct PromotionManager {
    factory: Option<Arc<dyn IndexFactory>>,
    sync_timeout: Duration,
    attempts: Mutex<FxHashMap<String, Attempt>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl PromotionManager {
    pub fn new(factory: Option<Arc<dyn IndexFactory>>, sync_timeout: Duration) -> Self {
        Self { factory, sync_timeout, attempts: Mutex::new(FxHashMap::default()), next_id: AtomicU64::new(1), shutdown: CancellationToken::new() }
    }

    fn attempts(&self) -> MutexGuard<'_, FxHashMap<String, Attempt>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn read(&self, descriptor: &ResourceDescriptor, namespaces: &[String]) -> PromotedRead {
        let index = match self.attempts().get(&descriptor.identity()) {
            None => return PromotedRead::Absent,
            Some(Attempt { index: Some(ix), .. }) if ix.has_synced() => ix.clone(),
            Some(_) => return PromotedRead::NotSynced,
        };
        PromotedRead::Ready(index.list(namespaces))
    }

    /// Start an all-namespaces index for `descriptor` unless one is already
    /// in flight or complete. Returns whether a new attempt was launched.
    pub fn maybe_promote(self: &Arc<Self>, descriptor: &ResourceDescriptor) -> bool {
        let Some(factory) = self.factory.clone() else { return false };
        if self.shutdown.is_cancelled() {
            return false;
        }
        let identity = descriptor.identity();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.attempts();
            if map.contains_key(&identity) {
                return false;
            }
            map.insert(identity.clone(), Attempt { id, index: None });
        }
        info!(resource = %identity, attempt = id, "catalog: promoting to watch index");
        let this = self.clone();
        let descriptor = descriptor.clone();
        tokio::spawn(async move { this.run_attempt(factory, descriptor, identity, id).await });
        true
    }

    async fn run_attempt(self: Arc<Self>, factory: Arc<dyn IndexFactory>, descriptor: ResourceDescriptor, identity: String, id: u64) {
        let index = match factory.start(&descriptor) {
            Ok(ix) => ix,
            Err(e) => {
                warn!(resource = %identity, attempt = id, error = %e, "catalog: promotion failed to start");
                self.forget(&identity, id);
                return;
            }
        };
        // Single writer wins: a superseded attempt tears its own index down.
        let installed = match self.attempts().get_mut(&identity) {
            Some(a) if a.id == id => {
                a.index = Some(index.clone());
                true
            }
            _ => false,
        };
        if !installed {
            debug!(resource = %identity, attempt = id, "catalog: promotion superseded");
            index.stop();
            return;
        }

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            r = tokio::time::timeout(self.sync_timeout, index.wait_synced()) => Some(r),
        };
        match outcome {
            Some(Ok(Ok(()))) => info!(resource = %identity, attempt = id, "catalog: promoted index synced"),
            Some(Ok(Err(e))) => {
                warn!(resource = %identity, attempt = id, error = %e, "catalog: promoted index failed");
                self.teardown(&identity, id, &index);
            }
            Some(Err(_)) => {
                warn!(resource = %identity, attempt = id, timeout_s = self.sync_timeout.as_secs(), "catalog: promoted index sync timed out");
                self.teardown(&identity, id, &index);
            }
            None => self.teardown(&identity, id, &index),
        }
    }

    fn forget(&self, identity: &str, id: u64) {
        let mut map = self.attempts();
        if map.get(identity).is_some_and(|a| a.id == id) {
            map.remove(identity);
        }
    }

    fn teardown(&self, identity: &str, id: u64, index: &Arc<dyn WatchIndex>) {
        self.forget(identity, id);
        index.stop();
    }

    /// Identities whose promoted index has synced, sorted.
    pub fn promoted(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .attempts()
            .iter()
            .filter(|(_, a)| a.index.as_ref().is_some_and(|ix| ix.has_synced()))
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }

    pub fn in_flight(&self) -> usize {
        self.attempts().len()
    }

    /// Stop every promoted index and cancel pending attempts.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<Attempt> = self.attempts().drain().map(|(_, a)| a).collect();
        let n = drained.len();
        for a in drained {
            if let Some(ix) = a.index {
                ix.stop();
            }
        }
        if n > 0 {
            info!(stopped = n, "catalog: promoted indexes stopped");
        }
    }
}
