//! Paginated dynamic listing.

use std::time::Instant;

use async_trait::async_trait;
use chrono::SecondsFormat;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use tracing::debug;

use orka_core::{ListError, ListPage, ObjectSummary, PageLister, ResourceDescriptor, SummaryMeta};

pub fn api_resource(d: &ResourceDescriptor) -> ApiResource {
    ApiResource {
        group: d.group.clone(),
        version: d.version.clone(),
        api_version: d.api_version(),
        kind: d.kind.clone(),
        plural: d.resource.clone(),
    }
}

/// Project a dynamic object onto its catalog summary.
pub fn summarize(d: &ResourceDescriptor, obj: &DynamicObject) -> ObjectSummary {
    let m = &obj.metadata;
    ObjectSummary::project(
        d,
        SummaryMeta {
            namespace: m.namespace.as_deref(),
            name: m.name.as_deref().unwrap_or(""),
            uid: m.uid.as_deref(),
            resource_version: m.resource_version.as_deref(),
            creation_timestamp: m.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339_opts(SecondsFormat::Secs, true)),
            labels: m.labels.as_ref(),
        },
    )
}

/// Map a kube error onto the retry taxonomy the collector understands.
pub fn classify_kube_error(err: kube::Error) -> ListError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            403 => ListError::Forbidden(resp.message),
            408 | 429 | 500 | 502 | 503 | 504 => ListError::Transient(format!("{} ({} {})", resp.message, resp.code, resp.reason)),
            _ => ListError::Fatal(format!("{} ({} {})", resp.message, resp.code, resp.reason)),
        },
        // Connection-level failures: the server is unreachable or the call timed out.
        e @ (kube::Error::HyperError(_) | kube::Error::Service(_)) => ListError::Transient(e.to_string()),
        e => {
            let msg = e.to_string();
            if msg.contains("timed out") || msg.contains("deadline") {
                ListError::Transient(msg)
            } else {
                ListError::Fatal(msg)
            }
        }
    }
}

/// `PageLister` over `Api<DynamicObject>`.
#[derive(Clone)]
pub struct KubeLister {
    client: Client,
}

impl KubeLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, d: &ResourceDescriptor, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(d);
        match namespace {
            Some(ns) if d.namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl PageLister for KubeLister {
    async fn list_page(
        &self,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        continue_token: Option<&str>,
        limit: u32,
    ) -> Result<ListPage, ListError> {
        let t0 = Instant::now();
        let mut lp = ListParams::default().limit(limit);
        if let Some(tok) = continue_token.filter(|t| !t.is_empty()) {
            lp = lp.continue_token(tok);
        }
        let list = self.api(descriptor, namespace).list(&lp).await.map_err(classify_kube_error)?;
        let items: Vec<ObjectSummary> = list.items.iter().map(|o| summarize(descriptor, o)).collect();
        metrics::histogram!("kubehub_list_page_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(resource = %descriptor.identity(), ns = ?namespace, items = items.len(), more = list.metadata.continue_.is_some(), "kubehub: list page");
        Ok(ListPage { items, continue_token: list.metadata.continue_ })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;
    use orka_core::Scope;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{} happened", reason),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(matches!(classify_kube_error(api_err(403, "Forbidden")), ListError::Forbidden(_)));
        assert!(classify_kube_error(api_err(429, "TooManyRequests")).is_transient());
        assert!(classify_kube_error(api_err(500, "InternalError")).is_transient());
        assert!(classify_kube_error(api_err(503, "ServiceUnavailable")).is_transient());
        assert!(classify_kube_error(api_err(504, "Timeout")).is_transient());
        assert!(matches!(classify_kube_error(api_err(404, "NotFound")), ListError::Fatal(_)));
        assert!(matches!(classify_kube_error(api_err(410, "Expired")), ListError::Fatal(_)));
    }

    #[test]
    fn summarize_reads_metadata() {
        let d = ResourceDescriptor::new("example.io", "v1", "widgets", "Widget", Scope::Namespaced);
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {
                "name": "w1",
                "namespace": "default",
                "uid": "0000-1",
                "resourceVersion": "7",
                "creationTimestamp": "2024-05-01T10:00:00Z",
                "labels": {"b": "2", "a": "1"}
            },
            "spec": {"size": 3}
        }))
        .expect("valid object");
        let s = summarize(&d, &obj);
        assert_eq!(s.key(), "example.io/v1/widgets/default/w1");
        assert_eq!(s.resource_version, "7");
        assert_eq!(s.creation_timestamp, "2024-05-01T10:00:00Z");
        assert_eq!(s.labels_digest, orka_core::labels_digest([("a", "1"), ("b", "2")]));
    }

    #[test]
    fn api_resource_uses_plural() {
        let d = ResourceDescriptor::new("", "v1", "configmaps", "ConfigMap", Scope::Namespaced);
        let ar = api_resource(&d);
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "configmaps");
    }
}
