//! Reflector-backed watch indexes used for promotion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::Api,
    core::DynamicObject,
    runtime::{reflector, watcher, WatchStreamExt},
    Client,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orka_core::{CatalogError, IndexFactory, ObjectSummary, ResourceDescriptor, WatchIndex};

use crate::list::{api_resource, summarize};

/// All-namespace list+watch for one kind, mirrored into a reflector store.
pub struct KubeWatchIndex {
    descriptor: ResourceDescriptor,
    reader: reflector::Store<DynamicObject>,
    synced: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KubeWatchIndex {
    pub fn spawn(client: Client, descriptor: &ResourceDescriptor) -> Self {
        let ar = api_resource(descriptor);
        let api: Api<DynamicObject> = Api::all_with(client, &ar);
        let writer = reflector::store::Writer::<DynamicObject>::new(ar);
        let reader = writer.as_reader();
        let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()).default_backoff());
        let id = descriptor.identity();
        let task = tokio::spawn(async move {
            futures::pin_mut!(stream);
            info!(resource = %id, "kubehub: watch index started");
            while let Some(ev) = stream.next().await {
                if let Err(e) = ev {
                    warn!(resource = %id, error = %e, "kubehub: watch index error; backing off");
                }
            }
            debug!(resource = %id, "kubehub: watch index stream ended");
        });
        Self { descriptor: descriptor.clone(), reader, synced: AtomicBool::new(false), task: Mutex::new(Some(task)) }
    }
}

#[async_trait]
impl WatchIndex for KubeWatchIndex {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn list(&self, namespaces: &[String]) -> Vec<ObjectSummary> {
        self.reader
            .state()
            .iter()
            .map(|o| summarize(&self.descriptor, o))
            .filter(|s| s.in_namespaces(namespaces))
            .collect()
    }

    async fn wait_synced(&self) -> Result<(), CatalogError> {
        self.reader.wait_until_ready().await.map_err(|e| CatalogError::Index {
            resource: self.descriptor.identity(),
            message: e.to_string(),
        })?;
        self.synced.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            h.abort();
            debug!(resource = %self.descriptor.identity(), "kubehub: watch index stopped");
        }
    }
}

impl Drop for KubeWatchIndex {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Clone)]
pub struct KubeIndexFactory {
    client: Client,
}

impl KubeIndexFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl IndexFactory for KubeIndexFactory {
    fn start(&self, descriptor: &ResourceDescriptor) -> Result<Arc<dyn WatchIndex>, CatalogError> {
        Ok(Arc::new(KubeWatchIndex::spawn(self.client.clone(), descriptor)))
    }
}
