//! Three-tier collection for one descriptor: shared watch index, promoted
//! index, then direct paginated listing.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use orka_core::{
    CatalogError, IndexSource, ListError, ListPage, ObjectSummary, PageLister, ResourceDescriptor, WatchIndex,
};
use orka_store::StreamingAggregator;

use crate::config::CatalogConfig;
use crate::promotion::{PromotedRead, PromotionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Shared,
    Promoted,
    Listed,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Shared => "shared",
            Tier::Promoted => "promoted",
            Tier::Listed => "list",
        }
    }
}

#[derive(Debug)]
pub struct Collected {
    pub summaries: Vec<ObjectSummary>,
    pub tier: Tier,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(CatalogError),
}

/// Exponential backoff for transient page failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay after the `failed`-th attempt (1-based): `base * 2^(failed-1)`, capped.
    pub fn backoff(&self, failed: u32) -> Duration {
        let factor = 1u32.checked_shl(failed.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Watch indexes maintained elsewhere in the process, keyed by descriptor identity.
#[derive(Default)]
pub struct SharedIndexes {
    map: RwLock<FxHashMap<String, Arc<dyn WatchIndex>>>,
}

impl SharedIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: &ResourceDescriptor, index: Arc<dyn WatchIndex>) {
        self.map.write().unwrap_or_else(|e| e.into_inner()).insert(descriptor.identity(), index);
    }

    pub fn remove(&self, descriptor: &ResourceDescriptor) -> Option<Arc<dyn WatchIndex>> {
        self.map.write().unwrap_or_else(|e| e.into_inner()).remove(&descriptor.identity())
    }
}

impl IndexSource for SharedIndexes {
    fn lookup(&self, descriptor: &ResourceDescriptor) -> Option<Arc<dyn WatchIndex>> {
        self.map.read().unwrap_or_else(|e| e.into_inner()).get(&descriptor.identity()).cloned()
    }
}

pub struct Collector {
    lister: Arc<dyn PageLister>,
    shared: Option<Arc<dyn IndexSource>>,
    promotion: Arc<PromotionManager>,
    page_size: u32,
    namespace_concurrency: usize,
    promotion_threshold: usize,
    retry: RetryPolicy,
}

impl Collector {
    pub fn new(
        lister: Arc<dyn PageLister>,
        shared: Option<Arc<dyn IndexSource>>,
        promotion: Arc<PromotionManager>,
        config: &CatalogConfig,
    ) -> Self {
        Self {
            lister,
            shared,
            promotion,
            page_size: config.page_size,
            namespace_concurrency: config.namespace_concurrency.max(1),
            promotion_threshold: config.promotion_threshold,
            retry: RetryPolicy { attempts: config.retry_attempts.max(1), base: config.retry_base, max: config.retry_max },
        }
    }

    /// Collect one descriptor. Every batch is emitted to `aggregator` as it
    /// arrives; the returned summaries are the full set for the store merge.
    pub async fn collect(
        &self,
        descriptor: &ResourceDescriptor,
        namespaces: &[String],
        aggregator: &StreamingAggregator,
        cancel: &CancellationToken,
    ) -> Result<Collected, CollectError> {
        if cancel.is_cancelled() {
            return Err(CollectError::Cancelled);
        }
        let started = Instant::now();
        // Cluster-scoped kinds ignore the namespace filter.
        let namespaces: &[String] = if descriptor.namespaced() { namespaces } else { &[] };

        let collected = if let Some(index) = self.shared.as_ref().and_then(|s| s.lookup(descriptor)).filter(|ix| ix.has_synced()) {
            let summaries = index.list(namespaces);
            aggregator.emit(&summaries);
            Collected { summaries, tier: Tier::Shared }
        } else {
            match self.promotion.read(descriptor, namespaces) {
                PromotedRead::Ready(summaries) => {
                    aggregator.emit(&summaries);
                    Collected { summaries, tier: Tier::Promoted }
                }
                read => {
                    if matches!(read, PromotedRead::NotSynced) {
                        debug!(resource = %descriptor.identity(), "catalog: promoted index not synced; listing");
                    }
                    let summaries = self.list(descriptor, namespaces, aggregator, cancel).await?;
                    if summaries.len() >= self.promotion_threshold {
                        self.promotion.maybe_promote(descriptor);
                    }
                    Collected { summaries, tier: Tier::Listed }
                }
            }
        };

        let ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("catalog_collect_ms", ms, "tier" => collected.tier.as_str());
        debug!(resource = %descriptor.identity(), tier = collected.tier.as_str(), items = collected.summaries.len(), took_ms = ms, "catalog: collected");
        Ok(collected)
    }

    async fn list(
        &self,
        descriptor: &ResourceDescriptor,
        namespaces: &[String],
        aggregator: &StreamingAggregator,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectSummary>, CollectError> {
        if namespaces.is_empty() {
            return self.list_chain(descriptor, None, aggregator, cancel).await;
        }
        let chain_futs: Vec<_> =
            namespaces.iter().map(|ns| self.list_chain(descriptor, Some(ns.as_str()), aggregator, cancel)).collect();
        let chains: Vec<Vec<ObjectSummary>> = stream::iter(chain_futs)
            .buffer_unordered(self.namespace_concurrency)
            .try_collect()
            .await?;
        Ok(chains.into_iter().flatten().collect())
    }

    /// Follow continuation tokens until exhausted. A forbidden page ends the
    /// chain and keeps what was already collected.
    async fn list_chain(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        aggregator: &StreamingAggregator,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectSummary>, CollectError> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = match self.fetch_page(descriptor, namespace, token.as_deref(), cancel).await {
                Ok(page) => page,
                Err(ListError::Forbidden(msg)) => {
                    debug!(resource = %descriptor.identity(), ns = %namespace.unwrap_or("(all)"), kept = out.len(), error = %msg, "catalog: listing truncated by forbidden");
                    break;
                }
                Err(ListError::Cancelled) => return Err(CollectError::Cancelled),
                Err(e) => {
                    return Err(CollectError::Failed(CatalogError::List { resource: descriptor.identity(), message: e.to_string() }))
                }
            };
            aggregator.emit(&page.items);
            out.extend(page.items);
            match page.continue_token {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn fetch_page(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        continue_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ListPage, ListError> {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ListError::Cancelled);
            }
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ListError::Cancelled),
                r = self.lister.list_page(descriptor, namespace, continue_token, self.page_size) => r,
            };
            match res {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.backoff(attempt);
                    metrics::counter!("catalog_list_retries_total", 1);
                    warn!(resource = %descriptor.identity(), attempt, delay_ms = delay.as_millis() as u64, error = %e, "catalog: transient list error; retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ListError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
