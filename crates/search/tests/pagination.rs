#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::Utc;
use orka_core::{ObjectSummary, ResourceDescriptor, Scope, SummaryMeta};
use orka_search::{query, Query};
use orka_store::{CatalogStore, CycleMerge, StoreSnapshot, StreamingAggregator};

fn widgets() -> ResourceDescriptor {
    ResourceDescriptor::new("example.io", "v1", "widgets", "Widget", Scope::Namespaced)
}

fn nodes() -> ResourceDescriptor {
    ResourceDescriptor::new("", "v1", "nodes", "Node", Scope::Cluster)
}

fn pvs() -> ResourceDescriptor {
    ResourceDescriptor::new("", "v1", "persistentvolumes", "PersistentVolume", Scope::Cluster)
}

fn obj(d: &ResourceDescriptor, ns: &str, name: &str) -> ObjectSummary {
    ObjectSummary::project(d, SummaryMeta { namespace: Some(ns), name, ..Default::default() })
}

fn seeded() -> CatalogStore {
    let store = CatalogStore::new();
    let descs = vec![widgets(), nodes(), pvs()];
    let prior = StoreSnapshot::default();
    store.merge(CycleMerge {
        descriptors: &descs,
        disallowed: &[],
        succeeded: vec![
            (widgets(), vec![obj(&widgets(), "b", "w3"), obj(&widgets(), "a", "w2"), obj(&widgets(), "a", "w1")]),
            (nodes(), vec![obj(&nodes(), "", "n1")]),
            (pvs(), vec![obj(&pvs(), "", "pv-b"), obj(&pvs(), "", "pv-a")]),
        ],
        failed: &[],
        prior: &prior,
        stamp: Utc::now(),
    });
    store
}

#[test]
fn limit_one_walk_is_stable_and_exhaustive() {
    let store = seeded();
    let full = query(&store, &Query { limit: Some(1000), ..Default::default() });
    assert_eq!(full.total_matches, 6);
    assert!(full.next_token.is_empty());

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = query(&store, &Query { limit: Some(1), token: token.clone(), ..Default::default() });
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_matches, 6);
        seen.push(page.items[0].key());
        if page.next_token.is_empty() {
            break;
        }
        token = Some(page.next_token);
    }
    let expected: Vec<String> = full.items.iter().map(|s| s.key()).collect();
    assert_eq!(seen, expected);
    let order: Vec<(&str, &str, &str)> = full.items.iter().map(|s| (s.kind.as_str(), s.namespace.as_str(), s.name.as_str())).collect();
    assert_eq!(
        order,
        vec![
            ("Node", "", "n1"),
            ("PersistentVolume", "", "pv-a"),
            ("PersistentVolume", "", "pv-b"),
            ("Widget", "a", "w1"),
            ("Widget", "a", "w2"),
            ("Widget", "b", "w3"),
        ]
    );
}

#[test]
fn cluster_filter_scopes_items_and_kinds() {
    let store = seeded();
    let page = query(&store, &Query { namespaces: vec!["cluster".into()], ..Default::default() });
    assert_eq!(page.total_matches, 3);
    assert!(page.items.iter().all(|s| s.cluster_scoped()));
    assert_eq!(page.kinds, vec!["Node".to_string(), "PersistentVolume".to_string()]);
    assert_eq!(page.matching_resource_count, 2);

    let unfiltered = query(&store, &Query::default());
    assert_eq!(unfiltered.kinds, vec!["Node".to_string(), "PersistentVolume".to_string(), "Widget".to_string()]);
    assert_eq!(unfiltered.namespaces, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn kind_and_search_filters_combine() {
    let store = seeded();
    let page = query(&store, &Query { kinds: vec!["example.io/widgets".into()], namespaces: vec!["A".into()], ..Default::default() });
    assert_eq!(page.total_matches, 2);
    assert_eq!(page.kinds, vec!["Widget".to_string()]);

    let page = query(&store, &Query { search: "PV-".into(), ..Default::default() });
    assert_eq!(page.total_matches, 2);
    assert!(page.items.iter().all(|s| s.kind == "PersistentVolume"));
}

#[test]
fn bad_tokens_restart_at_zero() {
    let store = seeded();
    for t in ["nope", "99", "-3", ""] {
        let page = query(&store, &Query { limit: Some(2), token: Some(t.into()), ..Default::default() });
        assert_eq!(page.items[0].name, "n1", "token {:?}", t);
        assert_eq!(page.next_token, "2");
    }
}

#[test]
fn streaming_view_is_preferred_mid_cycle() {
    let store = Arc::new(seeded());
    let agg = StreamingAggregator::new(store.clone());
    agg.emit(&[obj(&widgets(), "c", "w9")]);
    let page = query(&store, &Query::default());
    assert!(page.streaming);
    assert_eq!(page.total_matches, 1);
    assert_eq!(page.namespaces, vec!["c".to_string()]);

    store.clear_streaming();
    let settled = query(&store, &Query::default());
    assert!(!settled.streaming);
    assert_eq!(settled.total_matches, 6);
}
