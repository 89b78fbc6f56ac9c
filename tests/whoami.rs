//! Node self-identification through the application context.

mod common;

use common::*;
use fleet_sync::config::CacheConfig;
use fleet_sync::netstatus::NetworkStatus;
use fleet_sync::AppContext;

fn status_with_v4(ip: &str) -> NetworkStatus {
    NetworkStatus {
        ipv4: Some(ip.parse().unwrap()),
        ipv6: None,
    }
}

#[tokio::test]
async fn test_configured_uuid_wins_over_observed_address() {
    let store = MockStore::new();
    let node_a = make_node(1, "a", Some("1.2.3.4"), None);
    let node_b = make_node(2, "b", Some("5.6.7.8"), None);
    let pinned = node_b.uuid;
    store.set_nodes(vec![node_a, node_b]);

    let ctx = AppContext::new(store, &CacheConfig::default()).with_node_uuid(pinned);
    // the observed address points at node 1, but the pinned uuid wins
    let me = ctx.whoami(&status_with_v4("1.2.3.4")).await.unwrap().unwrap();
    assert_eq!(me.node_id, 2);
}

#[tokio::test]
async fn test_observed_address_matches_node() {
    let store = MockStore::new();
    store.set_nodes(vec![
        make_node(1, "a", Some("1.2.3.4"), None),
        make_node(2, "b", Some("5.6.7.8"), None),
    ]);

    let ctx = AppContext::new(store, &CacheConfig::default());
    let me = ctx.whoami(&status_with_v4("5.6.7.8")).await.unwrap().unwrap();
    assert_eq!(me.node_id, 2);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_unknown_host_matches_nothing() {
    let store = MockStore::new();
    store.set_nodes(vec![make_node(1, "a", Some("1.2.3.4"), None)]);

    let ctx = AppContext::new(store, &CacheConfig::default());
    let me = ctx.whoami(&status_with_v4("9.9.9.9")).await.unwrap();
    assert!(me.is_none());

    let offline = ctx.whoami(&NetworkStatus::default()).await.unwrap();
    assert!(offline.is_none());
}
