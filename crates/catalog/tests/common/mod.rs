#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orka_catalog::{CatalogConfig, CatalogService, CatalogServiceBuilder};
use orka_core::{
    AccessCheck, AccessDecision, CatalogError, DiscoveryAdapter, IndexFactory, ListError, ListPage, NoopTelemetry,
    ObjectSummary, PageLister, PermissionEvaluator, RawResource, RawResourceList, ResourceDescriptor, Scope, SummaryMeta,
    WatchIndex,
};

pub fn widgets() -> ResourceDescriptor {
    ResourceDescriptor::new("example.io", "v1", "widgets", "Widget", Scope::Namespaced)
}

pub fn nodes() -> ResourceDescriptor {
    ResourceDescriptor::new("", "v1", "nodes", "Node", Scope::Cluster)
}

pub fn summary(d: &ResourceDescriptor, ns: &str, name: &str) -> ObjectSummary {
    ObjectSummary::project(d, SummaryMeta { namespace: Some(ns), name, ..Default::default() })
}

/// In-memory stand-in for an API server.
#[derive(Default)]
pub struct FakeCluster {
    kinds: Mutex<Vec<ResourceDescriptor>>,
    objects: Mutex<HashMap<String, Vec<ObjectSummary>>>,
    failing: Mutex<HashSet<String>>,
    flaky: Mutex<HashMap<String, usize>>,
    forbid_after_pages: Mutex<HashMap<String, usize>>,
    hanging: Mutex<HashSet<String>>,
    discovery_fails: AtomicBool,
    calls: Mutex<HashMap<String, usize>>,
    namespaces_seen: Mutex<HashMap<String, Vec<String>>>,
    pub list_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Three widgets across two namespaces plus one node.
    pub fn standard() -> Arc<Self> {
        let c = Self::new();
        c.serve(widgets(), vec![summary(&widgets(), "a", "w1"), summary(&widgets(), "a", "w2"), summary(&widgets(), "b", "w3")]);
        c.serve(nodes(), vec![summary(&nodes(), "", "n1")]);
        c
    }

    pub fn serve(&self, d: ResourceDescriptor, items: Vec<ObjectSummary>) {
        let mut kinds = self.kinds.lock().unwrap();
        if !kinds.contains(&d) {
            kinds.push(d.clone());
        }
        self.objects.lock().unwrap().insert(d.identity(), items);
    }

    pub fn withdraw_all(&self) {
        self.kinds.lock().unwrap().clear();
        self.objects.lock().unwrap().clear();
    }

    pub fn fail(&self, d: &ResourceDescriptor) {
        self.failing.lock().unwrap().insert(d.identity());
    }

    pub fn heal(&self, d: &ResourceDescriptor) {
        self.failing.lock().unwrap().remove(&d.identity());
    }

    /// Fail the next `times` calls with a transient error, then serve normally.
    pub fn flake(&self, d: &ResourceDescriptor, times: usize) {
        self.flaky.lock().unwrap().insert(d.identity(), times);
    }

    pub fn forbid_after(&self, d: &ResourceDescriptor, pages: usize) {
        self.forbid_after_pages.lock().unwrap().insert(d.identity(), pages);
    }

    pub fn hang(&self, d: &ResourceDescriptor) {
        self.hanging.lock().unwrap().insert(d.identity());
    }

    pub fn break_discovery(&self, broken: bool) {
        self.discovery_fails.store(broken, Ordering::SeqCst);
    }

    pub fn calls_for(&self, d: &ResourceDescriptor) -> usize {
        self.calls.lock().unwrap().get(&d.identity()).copied().unwrap_or(0)
    }

    /// Distinct namespaces passed to the lister for `d`, sorted.
    pub fn namespaces_listed(&self, d: &ResourceDescriptor) -> Vec<String> {
        let mut seen = self.namespaces_seen.lock().unwrap().get(&d.identity()).cloned().unwrap_or_default();
        seen.sort();
        seen.dedup();
        seen
    }

    pub fn objects_of(&self, d: &ResourceDescriptor) -> Vec<ObjectSummary> {
        self.objects.lock().unwrap().get(&d.identity()).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DiscoveryAdapter for FakeCluster {
    async fn discover(&self) -> Result<Vec<RawResourceList>, CatalogError> {
        if self.discovery_fails.load(Ordering::SeqCst) {
            return Err(CatalogError::Discovery("connection refused".into()));
        }
        let kinds = self.kinds.lock().unwrap().clone();
        Ok(kinds
            .into_iter()
            .map(|d| RawResourceList {
                group_version: d.api_version(),
                resources: vec![
                    RawResource { name: d.resource.clone(), kind: d.kind.clone(), namespaced: d.namespaced(), verbs: vec!["list".into(), "watch".into()] },
                    RawResource { name: format!("{}/status", d.resource), kind: d.kind.clone(), namespaced: d.namespaced(), verbs: vec!["get".into()] },
                ],
            })
            .collect())
    }
}

#[async_trait]
impl PageLister for FakeCluster {
    async fn list_page(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        continue_token: Option<&str>,
        limit: u32,
    ) -> Result<ListPage, ListError> {
        let id = descriptor.identity();
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let page_no = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(id.clone()).or_default();
            *c += 1;
            *c
        };
        if let Some(ns) = namespace {
            self.namespaces_seen.lock().unwrap().entry(id.clone()).or_default().push(ns.to_string());
        }
        let hangs = self.hanging.lock().unwrap().contains(&id);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().unwrap().contains(&id) {
            return Err(ListError::Transient("503 service unavailable".into()));
        }
        let flaked = match self.flaky.lock().unwrap().get_mut(&id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if flaked {
            return Err(ListError::Transient("etcd leader changed".into()));
        }
        if let Some(n) = self.forbid_after_pages.lock().unwrap().get(&id) {
            if page_no > *n {
                return Err(ListError::Forbidden("namespace access revoked".into()));
            }
        }
        let all: Vec<ObjectSummary> = self
            .objects_of(descriptor)
            .into_iter()
            .filter(|s| namespace.map_or(true, |ns| s.namespace == ns))
            .collect();
        let offset: usize = continue_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + limit as usize).min(all.len());
        let next = if end < all.len() { Some(end.to_string()) } else { None };
        Ok(ListPage { items: all[offset.min(end)..end].to_vec(), continue_token: next })
    }
}

/// Allows everything except `deny`, errors for `broken`; the batch call can
/// be made to fail outright or to never answer.
#[derive(Default)]
pub struct FakeAuthz {
    pub deny: Mutex<HashSet<String>>,
    pub broken: Mutex<HashSet<String>>,
    pub batch_fails: AtomicBool,
    pub batch_hangs: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeAuthz {
    pub fn deny(&self, d: &ResourceDescriptor) {
        self.deny.lock().unwrap().insert(d.resource.clone());
    }

    pub fn allow(&self, d: &ResourceDescriptor) {
        self.deny.lock().unwrap().remove(&d.resource);
    }

    pub fn break_for(&self, d: &ResourceDescriptor) {
        self.broken.lock().unwrap().insert(d.resource.clone());
    }
}

#[async_trait]
impl PermissionEvaluator for FakeAuthz {
    async fn evaluate(&self, checks: &[AccessCheck]) -> Result<Vec<AccessDecision>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if checks.len() > 1 && self.batch_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if checks.len() > 1 && self.batch_fails.load(Ordering::SeqCst) {
            return Err(CatalogError::Permission { resource: "*".into(), message: "authorizer unreachable".into() });
        }
        let deny = self.deny.lock().unwrap();
        let broken = self.broken.lock().unwrap();
        Ok(checks
            .iter()
            .map(|c| {
                if broken.contains(&c.resource) {
                    AccessDecision { allowed: false, error: Some("review failed".into()) }
                } else {
                    AccessDecision { allowed: !deny.contains(&c.resource), error: None }
                }
            })
            .collect())
    }
}

/// Watch index over a fixed set of summaries.
pub struct FakeIndex {
    items: Vec<ObjectSummary>,
    syncs: bool,
    synced: AtomicBool,
    pub stopped: AtomicBool,
}

impl FakeIndex {
    pub fn synced(items: Vec<ObjectSummary>) -> Arc<Self> {
        Arc::new(Self { items, syncs: true, synced: AtomicBool::new(true), stopped: AtomicBool::new(false) })
    }

    pub fn never_syncs() -> Arc<Self> {
        Arc::new(Self { items: Vec::new(), syncs: false, synced: AtomicBool::new(false), stopped: AtomicBool::new(false) })
    }

    pub fn syncs_later(items: Vec<ObjectSummary>) -> Arc<Self> {
        Arc::new(Self { items, syncs: true, synced: AtomicBool::new(false), stopped: AtomicBool::new(false) })
    }
}

#[async_trait]
impl WatchIndex for FakeIndex {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn list(&self, namespaces: &[String]) -> Vec<ObjectSummary> {
        self.items.iter().filter(|s| s.in_namespaces(namespaces)).cloned().collect()
    }

    async fn wait_synced(&self) -> Result<(), CatalogError> {
        if !self.syncs {
            std::future::pending::<()>().await;
        }
        self.synced.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Builds indexes from the fake cluster's current contents.
pub struct FakeFactory {
    pub cluster: Arc<FakeCluster>,
    pub never_sync: bool,
    pub started: Mutex<Vec<Arc<FakeIndex>>>,
}

impl FakeFactory {
    pub fn new(cluster: Arc<FakeCluster>, never_sync: bool) -> Arc<Self> {
        Arc::new(Self { cluster, never_sync, started: Mutex::new(Vec::new()) })
    }
}

impl IndexFactory for FakeFactory {
    fn start(&self, descriptor: &ResourceDescriptor) -> Result<Arc<dyn WatchIndex>, CatalogError> {
        let ix = if self.never_sync { FakeIndex::never_syncs() } else { FakeIndex::syncs_later(self.cluster.objects_of(descriptor)) };
        self.started.lock().unwrap().push(ix.clone());
        Ok(ix)
    }
}

pub fn fast_config() -> CatalogConfig {
    CatalogConfig {
        retry_base: Duration::from_millis(1),
        retry_max: Duration::from_millis(4),
        sync_interval: Duration::from_millis(50),
        max_concurrency: 4,
        ..Default::default()
    }
}

pub fn builder(cluster: &Arc<FakeCluster>, config: CatalogConfig) -> CatalogServiceBuilder {
    CatalogService::builder()
        .config(config)
        .discovery(cluster.clone())
        .lister(cluster.clone())
        .telemetry(Arc::new(NoopTelemetry))
}

pub fn service(cluster: &Arc<FakeCluster>) -> CatalogService {
    builder(cluster, fast_config()).build().expect("service")
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
