//! Orka search: filtered, paginated catalog reads.
//!
//! Queries never touch the network. They prefer the streaming snapshot (usable
//! mid-sync) and fall back to scanning the settled store.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use orka_core::ObjectSummary;
use orka_store::CatalogStore;

pub const DEFAULT_LIMIT: usize = 200;
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    /// Kind, `group/kind`, resource, `group/resource` or `group/version/resource`.
    pub kinds: Vec<String>,
    /// Namespace names; `cluster` (or an empty entry) selects cluster-scoped objects.
    pub namespaces: Vec<String>,
    pub search: String,
    /// Zero or unset means [`DEFAULT_LIMIT`].
    pub limit: Option<usize>,
    /// Opaque continuation from a previous page.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryPage {
    pub items: Vec<ObjectSummary>,
    /// Empty on the last page.
    pub next_token: String,
    pub total_matches: usize,
    /// Distinct resource kinds among all matches.
    pub matching_resource_count: usize,
    pub kinds: Vec<String>,
    pub namespaces: Vec<String>,
    /// Served from the in-flight streaming view rather than the settled store.
    pub streaming: bool,
}

#[derive(Debug, Clone)]
enum KindTerm {
    /// `kind` or `resource`
    One(String),
    /// `group/kind`, `group/resource`; for the core group also `version/resource`
    Two(String, String),
    /// `group/version/resource`
    Three(String, String, String),
}

impl KindTerm {
    fn parse(raw: &str) -> Option<Self> {
        let t = raw.trim().to_ascii_lowercase();
        if t.is_empty() {
            return None;
        }
        let parts: Vec<&str> = t.split('/').collect();
        match parts.as_slice() {
            [one] => Some(KindTerm::One((*one).to_string())),
            [g, r] => Some(KindTerm::Two((*g).to_string(), (*r).to_string())),
            [g, v, r] => Some(KindTerm::Three((*g).to_string(), (*v).to_string(), (*r).to_string())),
            _ => None,
        }
    }

    fn matches(&self, s: &ObjectSummary) -> bool {
        let eq = |a: &str, b: &str| a.eq_ignore_ascii_case(b);
        match self {
            KindTerm::One(t) => eq(&s.kind, t) || eq(&s.resource, t),
            KindTerm::Two(g, r) => {
                (eq(&s.group, g) && (eq(&s.kind, r) || eq(&s.resource, r)))
                    || (s.group.is_empty() && eq(&s.version, g) && eq(&s.resource, r))
            }
            KindTerm::Three(g, v, r) => eq(&s.group, g) && eq(&s.version, v) && eq(&s.resource, r),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NamespaceFilter {
    active: bool,
    cluster: bool,
    names: Vec<String>,
}

impl NamespaceFilter {
    fn parse(raw: &[String]) -> Self {
        let mut f = NamespaceFilter { active: !raw.is_empty(), ..Default::default() };
        for n in raw {
            let n = n.trim();
            if n.is_empty() || n.eq_ignore_ascii_case("cluster") {
                f.cluster = true;
            } else {
                f.names.push(n.to_ascii_lowercase());
            }
        }
        f
    }

    fn matches(&self, s: &ObjectSummary) -> bool {
        if !self.active {
            return true;
        }
        if s.cluster_scoped() {
            self.cluster
        } else {
            self.names.iter().any(|n| s.namespace.eq_ignore_ascii_case(n))
        }
    }
}

/// Parsed form of a [`Query`]'s filters.
struct Filters {
    kinds: Vec<KindTerm>,
    namespaces: NamespaceFilter,
    search: String,
}

impl Filters {
    fn new(q: &Query) -> Self {
        Self {
            kinds: q.kinds.iter().filter_map(|k| KindTerm::parse(k)).collect(),
            namespaces: NamespaceFilter::parse(&q.namespaces),
            search: q.search.trim().to_lowercase(),
        }
    }

    fn matches(&self, s: &ObjectSummary) -> bool {
        if !self.namespaces.matches(s) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k.matches(s)) {
            return false;
        }
        self.search.is_empty() || [&s.name, &s.namespace, &s.kind].iter().any(|f| f.to_lowercase().contains(&self.search))
    }
}

fn summary_order(a: &ObjectSummary, b: &ObjectSummary) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| a.namespace.cmp(&b.namespace))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.group.cmp(&b.group))
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.resource.cmp(&b.resource))
}

fn clamp_limit(limit: Option<usize>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_LIMIT,
        Some(n) => n.clamp(1, MAX_LIMIT),
    }
}

/// Malformed or out-of-range tokens restart from the beginning.
fn parse_offset(token: Option<&str>, total: usize) -> usize {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse::<usize>().ok())
        .filter(|o| *o < total)
        .unwrap_or(0)
}

/// Run one query against the store (streaming view preferred).
pub fn query(store: &CatalogStore, q: &Query) -> QueryPage {
    let started = Instant::now();
    let filters = Filters::new(q);

    let (mut matched, ns_kinds, global_kinds, namespaces, streaming) = match store.streaming() {
        Some(snap) => {
            let mut matched = Vec::new();
            let mut ns_kinds = BTreeSet::new();
            for s in snap.items() {
                if filters.namespaces.active && filters.namespaces.matches(s) {
                    ns_kinds.insert(s.kind.clone());
                }
                if filters.matches(s) {
                    matched.push(s.clone());
                }
            }
            (matched, ns_kinds, snap.kinds.clone(), snap.namespaces.clone(), true)
        }
        None => {
            let mut ns_kinds = BTreeSet::new();
            let matched = store.collect_matching(|s| {
                if filters.namespaces.active && filters.namespaces.matches(s) {
                    ns_kinds.insert(s.kind.clone());
                }
                filters.matches(s)
            });
            (matched, ns_kinds, store.kinds().to_vec(), store.namespaces().to_vec(), false)
        }
    };

    matched.sort_by(summary_order);
    let total = matched.len();
    let matching_resource_count = matched.iter().map(|s| (&s.group, &s.version, &s.resource)).collect::<FxHashSet<_>>().len();
    let limit = clamp_limit(q.limit);
    let offset = parse_offset(q.token.as_deref(), total);
    let end = offset.saturating_add(limit).min(total);
    let next_token = if end < total { end.to_string() } else { String::new() };
    let items: Vec<ObjectSummary> = matched.drain(offset..end).collect();

    let kinds = if filters.namespaces.active { ns_kinds.into_iter().collect() } else { global_kinds };
    let elapsed = started.elapsed();
    metrics::histogram!("search_eval_ms", elapsed.as_secs_f64() * 1_000.0);
    debug!(total, offset, returned = items.len(), streaming, took_us = %elapsed.as_micros(), "search: query");
    QueryPage { items, next_token, total_matches: total, matching_resource_count, kinds, namespaces, streaming }
}
