//! Orka kubehub: discovery post-processing and kube-rs adapters for the catalog.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use kube::Client;
use tracing::{debug, info, warn};

use orka_core::{CatalogError, DiscoveryAdapter, RawResource, RawResourceList, ResourceDescriptor, Scope};

mod authz;
mod index;
mod list;

pub use authz::KubeAuthorizer;
pub use index::{KubeIndexFactory, KubeWatchIndex};
pub use list::{api_resource, classify_kube_error, summarize, KubeLister};

/// Kinds never cataloged: event logs churn too fast to be useful, and
/// ComponentStatus is a deprecated legacy status endpoint.
const EXCLUDED_KINDS: &[(&str, &str)] = &[("", "Event"), ("events.k8s.io", "Event"), ("", "ComponentStatus")];

/// Build a client from the ambient kubeconfig / in-cluster environment.
pub async fn connect() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Split `apps/v1` into `("apps", "v1")`; the core group has no prefix.
pub fn parse_group_version(gv: &str) -> (String, String) {
    match gv.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), gv.to_string()),
    }
}

/// Turn raw discovery output into listable descriptors.
///
/// Keeps input order; the first occurrence of an identity wins.
pub fn descriptors_from_raw(lists: &[RawResourceList]) -> Vec<ResourceDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        let (group, version) = parse_group_version(&list.group_version);
        for r in list.resources.iter() {
            if !is_listable(&group, r) {
                continue;
            }
            let scope = if r.namespaced { Scope::Namespaced } else { Scope::Cluster };
            let d = ResourceDescriptor::new(group.clone(), version.clone(), r.name.clone(), r.kind.clone(), scope);
            if seen.insert(d.identity()) {
                out.push(d);
            }
        }
    }
    out
}

fn is_listable(group: &str, r: &RawResource) -> bool {
    if r.kind.is_empty() || r.name.contains('/') {
        return false;
    }
    if EXCLUDED_KINDS.iter().any(|(g, k)| *g == group && *k == r.kind) {
        return false;
    }
    r.verbs.iter().any(|v| v == "list")
}

/// Discovery adapter over the kube client. Fetches the core versions plus
/// each group's preferred version under its own request timeout.
pub struct KubeDiscovery {
    client: Client,
    timeout: Duration,
}

impl KubeDiscovery {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self) -> Result<Vec<RawResourceList>> {
        let core = self.client.list_core_api_versions().await.context("listing core api versions")?;
        let groups = self.client.list_api_groups().await.context("listing api groups")?;

        let mut group_versions: Vec<String> = Vec::new();
        for g in groups.groups.iter() {
            let preferred = g
                .preferred_version
                .as_ref()
                .map(|v| v.group_version.clone())
                .or_else(|| g.versions.first().map(|v| v.group_version.clone()));
            if let Some(gv) = preferred {
                group_versions.push(gv);
            }
        }

        let mut out = Vec::with_capacity(core.versions.len() + group_versions.len());
        for v in core.versions.iter() {
            let list = self
                .client
                .list_core_api_resources(v)
                .await
                .with_context(|| format!("listing core resources for {}", v))?;
            out.push(raw_list(list));
        }

        let fetches = group_versions.iter().map(|gv| {
            let client = self.client.clone();
            async move { (gv, client.list_api_group_resources(gv).await) }
        });
        for (gv, res) in join_all(fetches).await {
            match res {
                Ok(list) => out.push(raw_list(list)),
                // An aggregated API being down must not sink the whole catalog.
                Err(e) => warn!(group_version = %gv, error = %e, "kubehub: group discovery failed; skipping"),
            }
        }
        Ok(out)
    }
}

fn raw_list(list: k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList) -> RawResourceList {
    RawResourceList {
        group_version: list.group_version,
        resources: list
            .resources
            .into_iter()
            .map(|r| RawResource { name: r.name, kind: r.kind, namespaced: r.namespaced, verbs: r.verbs })
            .collect(),
    }
}

#[async_trait]
impl DiscoveryAdapter for KubeDiscovery {
    async fn discover(&self) -> Result<Vec<RawResourceList>, CatalogError> {
        let t0 = Instant::now();
        debug!(timeout_ms = %self.timeout.as_millis(), "kubehub: discovery start");
        let lists = match tokio::time::timeout(self.timeout, self.fetch()).await {
            Ok(Ok(lists)) => lists,
            Ok(Err(e)) => return Err(CatalogError::Discovery(format!("{:#}", e))),
            Err(_) => return Err(CatalogError::Discovery(format!("timed out after {}s", self.timeout.as_secs()))),
        };
        let resources: usize = lists.iter().map(|l| l.resources.len()).sum();
        info!(group_versions = lists.len(), resources, took_ms = %t0.elapsed().as_millis(), "kubehub: discovery ok");
        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> RawResource {
        RawResource {
            name: name.to_string(),
            kind: kind.to_string(),
            namespaced,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn fixture() -> Vec<RawResourceList> {
        vec![
            RawResourceList {
                group_version: "v1".into(),
                resources: vec![
                    res("pods", "Pod", true, &["get", "list", "watch"]),
                    res("pods/log", "Pod", true, &["get"]),
                    res("pods/status", "Pod", true, &["get", "list"]),
                    res("events", "Event", true, &["list", "watch"]),
                    res("componentstatuses", "ComponentStatus", false, &["get", "list"]),
                    res("nodes", "Node", false, &["get", "list"]),
                    res("bindings", "Binding", true, &["create"]),
                ],
            },
            RawResourceList {
                group_version: "events.k8s.io/v1".into(),
                resources: vec![res("events", "Event", true, &["list"])],
            },
            RawResourceList {
                group_version: "example.io/v1".into(),
                resources: vec![
                    res("widgets", "Widget", true, &["list"]),
                    res("ghosts", "", true, &["list"]),
                    res("widgets", "Widget", true, &["list"]),
                ],
            },
        ]
    }

    #[test]
    fn filters_unlistable_and_excluded() {
        let out = descriptors_from_raw(&fixture());
        let ids: Vec<String> = out.iter().map(|d| d.identity()).collect();
        assert_eq!(ids, vec!["v1/pods", "v1/nodes", "example.io/v1/widgets"]);
        assert_eq!(out[1].scope, Scope::Cluster);
        assert_eq!(out[2].group, "example.io");
        assert_eq!(out[2].version, "v1");
    }

    #[test]
    fn output_is_order_stable() {
        let a = descriptors_from_raw(&fixture());
        let b = descriptors_from_raw(&fixture());
        assert_eq!(
            a.iter().map(|d| (d.identity(), d.kind.clone())).collect::<Vec<_>>(),
            b.iter().map(|d| (d.identity(), d.kind.clone())).collect::<Vec<_>>()
        );
    }

    #[test]
    fn group_version_parsing() {
        assert_eq!(parse_group_version("v1"), (String::new(), "v1".to_string()));
        assert_eq!(parse_group_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
    }
}
