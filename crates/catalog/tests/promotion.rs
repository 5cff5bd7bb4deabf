#![forbid(unsafe_code)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use orka_catalog::{CatalogConfig, PromotedRead, PromotionManager, SharedIndexes};

#[tokio::test]
async fn large_kinds_are_promoted_and_then_read_locally() {
    let cluster = FakeCluster::standard();
    let factory = FakeFactory::new(cluster.clone(), false);
    let svc = builder(&cluster, CatalogConfig { promotion_threshold: 2, ..fast_config() })
        .index_factory(factory.clone())
        .build()
        .expect("service");

    svc.sync_once().await.expect("first cycle lists");
    assert!(eventually(|| svc.promoted() == vec!["example.io/v1/widgets".to_string()]).await);
    let listed = cluster.calls_for(&widgets());

    svc.sync_once().await.expect("second cycle reads the index");
    assert_eq!(cluster.calls_for(&widgets()), listed);
    assert_eq!(svc.count(), 4);
    assert_eq!(factory.started.lock().unwrap().len(), 1);

    svc.shutdown();
    assert!(factory.started.lock().unwrap()[0].stopped.load(Ordering::SeqCst));
    assert!(svc.promoted().is_empty());
}

#[tokio::test]
async fn promotion_is_single_writer() {
    let cluster = FakeCluster::standard();
    let factory = FakeFactory::new(cluster.clone(), false);
    let pm = Arc::new(PromotionManager::new(Some(factory.clone()), Duration::from_secs(5)));
    assert!(pm.maybe_promote(&widgets()));
    assert!(!pm.maybe_promote(&widgets()), "in-flight attempt blocks a second one");
    assert!(eventually(|| matches!(pm.read(&widgets(), &[]), PromotedRead::Ready(_))).await);
    assert!(!pm.maybe_promote(&widgets()), "completed promotion blocks a second one");
    match pm.read(&widgets(), &["a".to_string()]) {
        PromotedRead::Ready(items) => assert_eq!(items.len(), 2),
        other => panic!("unexpected read: {:?}", other),
    }
    assert!(matches!(pm.read(&nodes(), &[]), PromotedRead::Absent));
    assert_eq!(factory.started.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unsynced_promotion_times_out_and_is_forgotten() {
    let cluster = FakeCluster::standard();
    let factory = FakeFactory::new(cluster.clone(), true);
    let pm = Arc::new(PromotionManager::new(Some(factory.clone()), Duration::from_millis(30)));
    assert!(pm.maybe_promote(&widgets()));
    assert!(eventually(|| matches!(pm.read(&widgets(), &[]), PromotedRead::NotSynced)).await);
    assert!(eventually(|| pm.in_flight() == 0).await);
    assert!(factory.started.lock().unwrap()[0].stopped.load(Ordering::SeqCst));
    // a later cycle may try again
    assert!(pm.maybe_promote(&widgets()));
    pm.shutdown();
    assert!(!pm.maybe_promote(&widgets()));
}

#[tokio::test]
async fn no_factory_means_no_promotion() {
    let pm = Arc::new(PromotionManager::new(None, Duration::from_secs(1)));
    assert!(!pm.maybe_promote(&widgets()));
    assert!(matches!(pm.read(&widgets(), &[]), PromotedRead::Absent));
}

#[tokio::test]
async fn shared_indexes_short_circuit_listing() {
    let cluster = FakeCluster::standard();
    let shared = Arc::new(SharedIndexes::new());
    shared.register(&nodes(), FakeIndex::synced(vec![summary(&nodes(), "", "n1"), summary(&nodes(), "", "n2")]));
    let svc = builder(&cluster, fast_config()).shared_indexes(shared.clone()).build().expect("service");
    svc.sync_once().await.expect("cycle");
    assert_eq!(cluster.calls_for(&nodes()), 0);
    assert_eq!(svc.snapshot().entries_for("v1/nodes").count(), 2);

    shared.remove(&nodes());
    svc.sync_once().await.expect("cycle");
    assert_eq!(cluster.calls_for(&nodes()), 1);
    assert_eq!(svc.snapshot().entries_for("v1/nodes").count(), 1);
}
