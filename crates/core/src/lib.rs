//! Orka core types: resource descriptors, object summaries and catalog keys.
//!
//! Everything in here is plain data plus the collaborator traits the catalog
//! pipeline is wired against. Kubernetes-backed implementations live in
//! `orka-kubehub`.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod error;
mod health;
mod traits;

pub use error::{CatalogError, ListError, PartialFailure};
pub use health::{HealthState, HealthStatus};
pub use traits::{
    DiscoveryAdapter, IndexFactory, IndexSource, NoopTelemetry, PageLister, PermissionEvaluator,
    TelemetrySink, WatchIndex,
};

pub mod prelude {
    pub use super::{
        catalog_key, labels_digest, CatalogError, ListError, ObjectSummary, ResourceDescriptor,
        Scope, SummaryMeta,
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Cluster,
    Namespaced,
}

/// One served resource kind. Identity is `(group, version, resource)`; the
/// kind name and scope ride along but do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
    pub kind: String,
    pub scope: Scope,
}

impl ResourceDescriptor {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        kind: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            kind: kind.into(),
            scope,
        }
    }

    /// `group/version/resource`, or `version/resource` for the core group.
    pub fn identity(&self) -> String {
        identity_of(&self.group, &self.version, &self.resource)
    }

    pub fn namespaced(&self) -> bool {
        matches!(self.scope, Scope::Namespaced)
    }

    /// `apiVersion` as it appears on objects of this kind.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Ordering used by `descriptors()`: group, version, resource, kind.
    pub fn catalog_cmp(&self, other: &Self) -> Ordering {
        self.group
            .cmp(&other.group)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.resource.cmp(&other.resource))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialEq for ResourceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.version == other.version && self.resource == other.resource
    }
}

impl Eq for ResourceDescriptor {}

impl Hash for ResourceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.version.hash(state);
        self.resource.hash(state);
    }
}

fn identity_of(group: &str, version: &str, resource: &str) -> String {
    if group.is_empty() {
        format!("{}/{}", version, resource)
    } else {
        format!("{}/{}/{}", group, version, resource)
    }
}

/// Store primary key: `identity/namespace/name`. Namespace is empty for
/// cluster-scoped objects.
pub fn catalog_key(descriptor: &ResourceDescriptor, namespace: &str, name: &str) -> String {
    let ns = if descriptor.namespaced() { namespace } else { "" };
    format!("{}/{}/{}", descriptor.identity(), ns, name)
}

/// Deterministic digest of a label set: 64-bit FNV-1a over the pairs sorted
/// by key then value, as 16 hex digits. Empty input yields an empty string.
pub fn labels_digest<'a, I>(labels: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: SmallVec<[(&str, &str); 8]> = labels.into_iter().collect();
    if pairs.is_empty() {
        return String::new();
    }
    pairs.sort_unstable();
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    };
    // length-prefixed so key/value boundaries are unambiguous
    for (k, v) in pairs.iter() {
        feed(&(k.len() as u64).to_le_bytes());
        feed(k.as_bytes());
        feed(&(v.len() as u64).to_le_bytes());
        feed(v.as_bytes());
    }
    format!("{:016x}", h)
}

/// Metadata view an adapter hands over when projecting an object.
#[derive(Debug, Clone, Default)]
pub struct SummaryMeta<'a> {
    pub namespace: Option<&'a str>,
    pub name: &'a str,
    pub uid: Option<&'a str>,
    pub resource_version: Option<&'a str>,
    /// Already rendered as RFC3339.
    pub creation_timestamp: Option<String>,
    pub labels: Option<&'a BTreeMap<String, String>>,
}

/// Denormalized projection of one object. Never carries the object body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectSummary {
    pub kind: String,
    pub group: String,
    pub version: String,
    pub resource: String,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: String,
    /// RFC3339 or empty.
    pub creation_timestamp: String,
    pub scope: Scope,
    pub labels_digest: String,
}

impl ObjectSummary {
    pub fn project(descriptor: &ResourceDescriptor, meta: SummaryMeta<'_>) -> Self {
        let namespace = if descriptor.namespaced() {
            meta.namespace.unwrap_or("").to_string()
        } else {
            String::new()
        };
        let labels_digest = meta
            .labels
            .map(|l| labels_digest(l.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
            .unwrap_or_default();
        Self {
            kind: descriptor.kind.clone(),
            group: descriptor.group.clone(),
            version: descriptor.version.clone(),
            resource: descriptor.resource.clone(),
            namespace,
            name: meta.name.to_string(),
            uid: meta.uid.unwrap_or("").to_string(),
            resource_version: meta.resource_version.unwrap_or("").to_string(),
            creation_timestamp: meta.creation_timestamp.unwrap_or_default(),
            scope: descriptor.scope,
            labels_digest,
        }
    }

    pub fn identity(&self) -> String {
        identity_of(&self.group, &self.version, &self.resource)
    }

    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.identity(), self.namespace, self.name)
    }

    pub fn cluster_scoped(&self) -> bool {
        matches!(self.scope, Scope::Cluster)
    }

    /// True when `namespaces` is empty or lists this object's namespace.
    /// Cluster-scoped objects pass any filter.
    pub fn in_namespaces(&self, namespaces: &[String]) -> bool {
        self.cluster_scoped() || namespaces.is_empty() || namespaces.iter().any(|n| n == &self.namespace)
    }
}

/// One entry of a group-version resource list as served by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawResource {
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

/// Resource list for one group-version (`v1`, `apps/v1`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawResourceList {
    pub group_version: String,
    pub resources: Vec<RawResource>,
}

/// One authorization question: may the active identity `verb` this resource?
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCheck {
    pub id: usize,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub verb: String,
}

impl AccessCheck {
    pub fn list(id: usize, descriptor: &ResourceDescriptor) -> Self {
        Self {
            id,
            group: descriptor.group.clone(),
            version: descriptor.version.clone(),
            resource: descriptor.resource.clone(),
            verb: "list".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub error: Option<String>,
}

/// One page of a paginated list call.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<ObjectSummary>,
    /// Server continuation token; `None` or empty when exhausted.
    pub continue_token: Option<String>,
}
