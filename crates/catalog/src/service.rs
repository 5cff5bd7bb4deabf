//! Sync orchestrator: owns the store, health and collaborators, and runs
//! discover → gate → collect → merge → finalize cycles.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use orka_core::{
    CatalogError, DiscoveryAdapter, HealthStatus, IndexFactory, IndexSource, ObjectSummary, PageLister, PartialFailure,
    PermissionEvaluator, ResourceDescriptor, TelemetrySink,
};
use orka_search::{Query, QueryPage};
use orka_store::{CatalogStore, CycleMerge, StoreSnapshot, StreamingAggregator, StreamingSubscription};

use crate::collector::{CollectError, Collector};
use crate::config::CatalogConfig;
use crate::gate::{Access, PermissionGate};
use crate::health::HealthTracker;
use crate::promotion::PromotionManager;
use crate::telemetry::MetricsTelemetry;

/// Kinds streamed first (small, structural) and last (high cardinality).
const STREAM_FIRST: &[(&str, &str)] = &[
    ("", "namespaces"),
    ("", "nodes"),
    ("apiextensions.k8s.io", "customresourcedefinitions"),
    ("apps", "deployments"),
    ("apps", "statefulsets"),
    ("apps", "daemonsets"),
    ("", "services"),
];
const STREAM_LAST: &[(&str, &str)] = &[
    ("", "configmaps"),
    ("", "secrets"),
    ("", "endpoints"),
    ("discovery.k8s.io", "endpointslices"),
    ("apps", "replicasets"),
    ("", "pods"),
];

fn stream_priority(d: &ResourceDescriptor) -> i32 {
    let key = (d.group.as_str(), d.resource.as_str());
    if let Some(i) = STREAM_FIRST.iter().position(|k| *k == key) {
        return i as i32 - STREAM_FIRST.len() as i32;
    }
    if let Some(i) = STREAM_LAST.iter().position(|k| *k == key) {
        return i as i32 + 1;
    }
    0
}

fn stream_order(a: &ResourceDescriptor, b: &ResourceDescriptor) -> Ordering {
    stream_priority(a)
        .cmp(&stream_priority(b))
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.group.cmp(&b.group))
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.resource.cmp(&b.resource))
}

/// Summary of one clean cycle.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub item_count: usize,
    pub resource_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub denied: usize,
    pub duration: Duration,
    pub first_batch_latency: Option<Duration>,
}

/// Outcomes written concurrently by collection tasks.
#[derive(Default)]
struct CycleResults {
    succeeded: Vec<(ResourceDescriptor, Vec<ObjectSummary>)>,
    denied: Vec<ResourceDescriptor>,
    /// Permission evaluation failed: purged and reported.
    unresolved: Vec<(ResourceDescriptor, String)>,
    failed: Vec<(ResourceDescriptor, String)>,
    cancelled: bool,
}

impl CycleResults {
    fn recorded(&self) -> FxHashSet<String> {
        self.succeeded
            .iter()
            .map(|(d, _)| d)
            .chain(self.denied.iter())
            .chain(self.unresolved.iter().map(|(d, _)| d))
            .chain(self.failed.iter().map(|(d, _)| d))
            .map(|d| d.identity())
            .collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    config: CatalogConfig,
    store: Arc<CatalogStore>,
    discovery: Arc<dyn DiscoveryAdapter>,
    gate: PermissionGate,
    collector: Collector,
    promotion: Arc<PromotionManager>,
    health: HealthTracker,
    telemetry: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
    started: AtomicBool,
}

#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<Inner>,
}

#[derive(Default)]
pub struct CatalogServiceBuilder {
    config: CatalogConfig,
    store: Option<Arc<CatalogStore>>,
    discovery: Option<Arc<dyn DiscoveryAdapter>>,
    lister: Option<Arc<dyn PageLister>>,
    evaluator: Option<Arc<dyn PermissionEvaluator>>,
    shared_indexes: Option<Arc<dyn IndexSource>>,
    index_factory: Option<Arc<dyn IndexFactory>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl CatalogServiceBuilder {
    pub fn config(mut self, config: CatalogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<CatalogStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryAdapter>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn lister(mut self, lister: Arc<dyn PageLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    /// Without an evaluator every descriptor is allowed.
    pub fn evaluator(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn shared_indexes(mut self, source: Arc<dyn IndexSource>) -> Self {
        self.shared_indexes = Some(source);
        self
    }

    /// Enables promotion of large kinds to watch indexes.
    pub fn index_factory(mut self, factory: Arc<dyn IndexFactory>) -> Self {
        self.index_factory = Some(factory);
        self
    }

    /// Defaults to [`MetricsTelemetry`].
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn build(self) -> Result<CatalogService, CatalogError> {
        self.config.validate()?;
        let discovery = self.discovery.ok_or_else(|| CatalogError::Config("discovery adapter is required".into()))?;
        let lister = self.lister.ok_or_else(|| CatalogError::Config("page lister is required".into()))?;
        let promotion = Arc::new(PromotionManager::new(self.index_factory, self.config.promotion_sync_timeout));
        let collector = Collector::new(lister, self.shared_indexes, promotion.clone(), &self.config);
        let inner = Inner {
            store: self.store.unwrap_or_default(),
            discovery,
            gate: PermissionGate::new(self.evaluator),
            collector,
            promotion,
            health: HealthTracker::new(),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(MetricsTelemetry)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            config: self.config,
        };
        Ok(CatalogService { inner: Arc::new(inner) })
    }
}

impl CatalogService {
    pub fn builder() -> CatalogServiceBuilder {
        CatalogServiceBuilder::default()
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    /// Spawn the refresh loop. Returns `None` when disabled or already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if !self.inner.config.enabled {
            info!("catalog: disabled; refresh loop not started");
            return None;
        }
        if self.inner.started.swap(true, AtomicOrdering::AcqRel) {
            return None;
        }
        let svc = self.clone();
        Some(tokio::spawn(async move { svc.run_loop().await }))
    }

    async fn run_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_s = self.inner.config.sync_interval.as_secs(), "catalog: refresh loop started");
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let res = self.sync_once().await;
            let h = self.health();
            match res {
                Ok(r) => info!(
                    items = r.item_count,
                    resources = r.resource_count,
                    took_ms = %r.duration.as_millis(),
                    state = ?h.state,
                    "catalog: cycle ok"
                ),
                Err(CatalogError::Cancelled) => break,
                Err(e) => warn!(
                    error = %e,
                    state = ?h.state,
                    failures = h.consecutive_failures,
                    failed_resources = h.failed_resource_count,
                    "catalog: cycle failed"
                ),
            }
        }
        info!("catalog: refresh loop stopped");
    }

    /// Cancel the loop and any in-flight cycle, then stop promoted indexes.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.promotion.shutdown();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Run one full cycle.
    pub async fn sync_once(&self) -> Result<SyncReport, CatalogError> {
        let inner = &self.inner;
        let started = Instant::now();
        if !inner.config.enabled {
            inner.telemetry.record_catalog(false, inner.store.count(), inner.store.descriptors().len(), Duration::ZERO, None);
            return Ok(SyncReport::default());
        }
        let cycle_at = Utc::now();
        let prior = inner.store.snapshot();

        let raw = match self.discover().await {
            Ok(raw) => raw,
            Err(CatalogError::Cancelled) => return Err(CatalogError::Cancelled),
            Err(e) => {
                error!(error = %e, "catalog: discovery failed");
                inner.health.record_error(cycle_at, &e);
                self.record(started, Some(&e));
                return Err(e);
            }
        };
        let mut descriptors = orka_kubehub::descriptors_from_raw(&raw);
        if descriptors.is_empty() {
            info!("catalog: discovery returned no listable resources; clearing");
            inner.health.record_success(cycle_at);
            inner.store.clear();
            self.record(started, None);
            return Ok(SyncReport { duration: started.elapsed(), ..Default::default() });
        }
        descriptors.sort_by(stream_order);
        debug!(descriptors = descriptors.len(), "catalog: discovered");

        let batch = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(CatalogError::Cancelled),
            b = inner.gate.evaluate_batch(&descriptors) => b,
        };
        let verdict = match batch {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "catalog: batch permission check failed; evaluating individually");
                None
            }
        };

        let aggregator = Arc::new(StreamingAggregator::new(inner.store.clone()));
        let results = self.collect_all(&descriptors, verdict.as_ref(), &aggregator).await;
        let mut results = match Arc::try_unwrap(results) {
            Ok(m) => m.into_inner().unwrap_or_else(|e| e.into_inner()),
            Err(shared) => std::mem::take(&mut *lock(&shared)),
        };
        if results.cancelled || inner.cancel.is_cancelled() {
            info!(emitted = aggregator.item_count(), "catalog: cycle cancelled");
            return Err(CatalogError::Cancelled);
        }

        let recorded = results.recorded();
        for d in descriptors.iter().filter(|d| !recorded.contains(&d.identity())) {
            results.failed.push((d.clone(), format!("{}: collection task aborted", d.identity())));
        }
        self.finish(cycle_at, started, &descriptors, &prior, results, &aggregator)
    }

    async fn discover(&self) -> Result<Vec<orka_core::RawResourceList>, CatalogError> {
        let inner = &self.inner;
        let timeout = inner.config.discovery_timeout;
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(CatalogError::Cancelled),
            r = tokio::time::timeout(timeout, inner.discovery.discover()) => match r {
                Ok(res) => res,
                Err(_) => Err(CatalogError::Discovery(format!("timed out after {}s", timeout.as_secs()))),
            },
        }
    }

    /// One bounded task per descriptor: gate (with single fallback), then collect.
    async fn collect_all(
        &self,
        descriptors: &[ResourceDescriptor],
        verdict: Option<&crate::gate::BatchVerdict>,
        aggregator: &Arc<StreamingAggregator>,
    ) -> Arc<Mutex<CycleResults>> {
        let inner = &self.inner;
        let results = Arc::new(Mutex::new(CycleResults::default()));
        let permits = Arc::new(Semaphore::new(inner.config.max_concurrency));
        let namespaces = Arc::new(inner.config.namespaces.clone());
        let mut tasks = JoinSet::new();

        for (i, desc) in descriptors.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => break,
                p = permits.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let batched = verdict.and_then(|v| v.get(i));
            let svc = self.clone();
            let desc = desc.clone();
            let agg = aggregator.clone();
            let results = results.clone();
            let namespaces = namespaces.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let inner = &svc.inner;
                let access = tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => {
                        lock(&results).cancelled = true;
                        return;
                    }
                    a = inner.gate.resolve(&desc, batched) => a,
                };
                match access {
                    Access::Denied => {
                        debug!(resource = %desc.identity(), "catalog: list denied; purging");
                        lock(&results).denied.push(desc);
                    }
                    Access::Errored(cause) => lock(&results).unresolved.push((desc, cause)),
                    Access::Allowed => match inner.collector.collect(&desc, &namespaces, &agg, &inner.cancel).await {
                        Ok(c) => lock(&results).succeeded.push((desc, c.summaries)),
                        Err(CollectError::Cancelled) => lock(&results).cancelled = true,
                        Err(CollectError::Failed(e)) => {
                            warn!(resource = %desc.identity(), error = %e, "catalog: collection failed; keeping last-known data");
                            lock(&results).failed.push((desc, e.to_string()));
                        }
                    },
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "catalog: collection task panicked");
            }
        }
        if inner.cancel.is_cancelled() {
            lock(&results).cancelled = true;
        }
        results
    }

    fn finish(
        &self,
        cycle_at: chrono::DateTime<Utc>,
        started: Instant,
        descriptors: &[ResourceDescriptor],
        prior: &StoreSnapshot,
        results: CycleResults,
        aggregator: &StreamingAggregator,
    ) -> Result<SyncReport, CatalogError> {
        let inner = &self.inner;
        let CycleResults { succeeded, denied, unresolved, failed, .. } = results;
        let succeeded_n = succeeded.len();
        let disallowed: Vec<ResourceDescriptor> = denied.iter().cloned().chain(unresolved.iter().map(|(d, _)| d.clone())).collect();
        let failed_descs: Vec<ResourceDescriptor> = failed.iter().map(|(d, _)| d.clone()).collect();

        let stats = inner.store.merge(CycleMerge {
            descriptors,
            disallowed: &disallowed,
            succeeded,
            failed: &failed_descs,
            prior,
            stamp: cycle_at,
        });

        let mut failures: Vec<(String, String)> =
            failed.into_iter().chain(unresolved).map(|(d, cause)| (d.identity(), cause)).collect();
        failures.sort();

        // Health is settled before readiness is published to subscribers.
        let outcome = if failures.is_empty() {
            inner.health.record_success(cycle_at);
            aggregator.finalize(descriptors, true);
            let evicted = inner.store.evict_expired(Utc::now(), inner.config.eviction_ttl);
            // Retained or evicted entries make the settled store differ from what was streamed.
            if evicted > 0 || inner.store.count() != aggregator.item_count() {
                inner.store.rebuild_streaming(true);
            }
            Ok(())
        } else {
            let (failed_ids, causes): (Vec<String>, Vec<String>) = failures.into_iter().unzip();
            let pf = PartialFailure { failed: failed_ids, causes, total: descriptors.len() };
            warn!(failed = pf.failed.len(), total = pf.total, "catalog: partial failure; eviction skipped");
            inner.health.record_partial(cycle_at, &pf, succeeded_n);
            aggregator.finalize(descriptors, false);
            inner.store.rebuild_streaming(false);
            Err(CatalogError::PartialFailure(pf))
        };

        let err = outcome.as_ref().err();
        self.record(started, err);
        debug!(purged = stats.purged, replaced = stats.replaced, restored = stats.restored, "catalog: merged");
        match outcome {
            Ok(()) => Ok(SyncReport {
                item_count: inner.store.count(),
                resource_count: inner.store.descriptors().len(),
                succeeded: succeeded_n,
                failed: 0,
                denied: denied.len(),
                duration: started.elapsed(),
                first_batch_latency: aggregator.first_batch_latency(),
            }),
            Err(e) => Err(e),
        }
    }

    fn record(&self, started: Instant, error: Option<&CatalogError>) {
        let inner = &self.inner;
        inner.telemetry.record_catalog(true, inner.store.count(), inner.store.descriptors().len(), started.elapsed(), error);
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.inner.store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.store.snapshot()
    }

    pub fn count(&self) -> usize {
        self.inner.store.count()
    }

    pub fn descriptors(&self) -> Vec<ResourceDescriptor> {
        self.inner.store.descriptors()
    }

    pub fn namespaces(&self) -> Arc<Vec<String>> {
        self.inner.store.namespaces()
    }

    pub fn health(&self) -> HealthStatus {
        self.inner.health.status()
    }

    pub fn query(&self, q: &Query) -> QueryPage {
        orka_search::query(&self.inner.store, q)
    }

    pub fn subscribe_streaming(&self) -> StreamingSubscription {
        self.inner.store.subscribe_streaming()
    }

    pub fn promoted(&self) -> Vec<String> {
        self.inner.promotion.promoted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orka_core::Scope;

    fn d(group: &str, resource: &str, kind: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(group, "v1", resource, kind, Scope::Namespaced)
    }

    #[test]
    fn structural_kinds_stream_first_and_pods_last() {
        let mut descs = vec![
            d("", "pods", "Pod"),
            d("example.io", "widgets", "Widget"),
            d("", "nodes", "Node"),
            d("", "configmaps", "ConfigMap"),
            d("", "namespaces", "Namespace"),
            d("batch", "jobs", "Job"),
        ];
        descs.sort_by(stream_order);
        let order: Vec<&str> = descs.iter().map(|d| d.resource.as_str()).collect();
        assert_eq!(order, vec!["namespaces", "nodes", "jobs", "widgets", "configmaps", "pods"]);
    }
}
