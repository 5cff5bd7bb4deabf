//! Collaborator seams. The catalog only ever talks to the cluster through
//! these; `orka-kubehub` provides the kube-rs implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    AccessCheck, AccessDecision, CatalogError, ListError, ListPage, ObjectSummary, RawResourceList,
    ResourceDescriptor,
};

#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    async fn discover(&self) -> Result<Vec<RawResourceList>, CatalogError>;
}

/// Wire client for one paginated list call.
#[async_trait]
pub trait PageLister: Send + Sync {
    /// `namespace = None` lists across all namespaces (or a cluster-scoped kind).
    async fn list_page(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        continue_token: Option<&str>,
        limit: u32,
    ) -> Result<ListPage, ListError>;
}

/// Batch authorizer. Returns one decision per check, in order. An `Err`
/// means the call as a whole failed and callers should fall back to
/// evaluating checks one at a time.
#[async_trait]
pub trait PermissionEvaluator: Send + Sync {
    async fn evaluate(&self, checks: &[AccessCheck]) -> Result<Vec<AccessDecision>, CatalogError>;
}

/// A continuously updated local index for one resource kind.
#[async_trait]
pub trait WatchIndex: Send + Sync {
    fn has_synced(&self) -> bool;

    /// Current contents, restricted to `namespaces` when non-empty.
    fn list(&self, namespaces: &[String]) -> Vec<ObjectSummary>;

    /// Resolves once the initial list has landed.
    async fn wait_synced(&self) -> Result<(), CatalogError>;

    /// Stop the underlying watch. Idempotent.
    fn stop(&self);
}

/// Indexes maintained elsewhere in the process that the catalog may read.
pub trait IndexSource: Send + Sync {
    fn lookup(&self, descriptor: &ResourceDescriptor) -> Option<Arc<dyn WatchIndex>>;
}

/// Builds all-namespace watch indexes for promotion.
pub trait IndexFactory: Send + Sync {
    fn start(&self, descriptor: &ResourceDescriptor) -> Result<Arc<dyn WatchIndex>, CatalogError>;
}

/// Fire-and-forget per-cycle telemetry.
pub trait TelemetrySink: Send + Sync {
    fn record_catalog(
        &self,
        enabled: bool,
        item_count: usize,
        resource_count: usize,
        duration: Duration,
        error: Option<&CatalogError>,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_catalog(
        &self,
        _enabled: bool,
        _items: usize,
        _resources: usize,
        _duration: Duration,
        _error: Option<&CatalogError>,
    ) {
    }
}
