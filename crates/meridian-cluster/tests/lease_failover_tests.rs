// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lease exclusivity and failover across simulated nodes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meridian_bus::EventBus;
use meridian_cluster::{InMemoryLeaseStore, LeaseManager, LeaseSettings, ManualClock};
use meridian_core::{LeaseStore, PollGate, ServerId};
use meridian_storage::{Database, SqliteLeaseStore};

const SETTINGS: LeaseSettings = LeaseSettings {
    ttl: Duration::from_secs(30),
    heartbeat_interval: Duration::from_secs(10),
};

fn node(store: Arc<dyn LeaseStore>, id: &str, clock: &Arc<ManualClock>) -> LeaseManager {
    LeaseManager::new(store, ServerId::from(id), SETTINGS, EventBus::default())
        .with_clock(clock.clone())
}

#[tokio::test]
async fn only_one_node_polls_a_clustered_channel() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let nodes: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| node(store.clone(), id, &clock))
        .collect();

    let mut handles = Vec::new();
    for n in &nodes {
        handles.push(n.activate("adt-in").await);
    }

    for _ in 0..6 {
        clock.advance(SETTINGS.heartbeat_interval);
        for n in &nodes {
            n.tick().await;
        }
        let polling = handles.iter().filter(|h| h.decide().is_proceed()).count();
        assert_eq!(polling, 1);
    }
    assert_eq!(handles[0].fencing_token(), Some(1));
}

#[tokio::test]
async fn survivor_takes_over_within_ttl_plus_heartbeat() {
    let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let a = node(store.clone(), "a", &clock);
    let b = node(store.clone(), "b", &clock);

    let a_handle = a.activate("adt-in").await;
    let b_handle = b.activate("adt-in").await;
    assert_eq!(a_handle.fencing_token(), Some(1));
    assert!(!b_handle.is_held());

    // Node a dies: no more heartbeats from it.
    let deadline = SETTINGS.ttl + SETTINGS.heartbeat_interval;
    let mut waited = Duration::ZERO;
    while !b_handle.is_held() {
        assert!(waited <= deadline, "no takeover within {deadline:?}");
        clock.advance(SETTINGS.heartbeat_interval);
        waited += SETTINGS.heartbeat_interval;
        b.tick().await;
    }

    assert!(waited <= deadline);
    assert_eq!(b_handle.fencing_token(), Some(2));
    assert!(!a_handle.decide().is_proceed());
    assert!(a.validate_token("adt-in", 1).await.is_err());
    b.validate_token("adt-in", 2).await.unwrap();
}

#[tokio::test]
async fn nodes_sharing_a_database_file_agree_on_the_holder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.db");
    let path = path.to_str().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));

    let a = node(
        Arc::new(SqliteLeaseStore::new(Database::open(path, true).await.unwrap())),
        "a",
        &clock,
    );
    let b = node(
        Arc::new(SqliteLeaseStore::new(Database::open(path, true).await.unwrap())),
        "b",
        &clock,
    );

    let (ha, hb) = tokio::join!(a.activate("lab-orders"), b.activate("lab-orders"));
    assert_eq!(
        [ha.is_held(), hb.is_held()].iter().filter(|held| **held).count(),
        1
    );

    let inventory = a.active_leases().await.unwrap();
    assert_eq!(inventory.len(), 1);
    let holder = if ha.is_held() { "a" } else { "b" };
    assert_eq!(inventory[0].holder_server_id, ServerId::from(holder));

    a.release_all().await;
    b.release_all().await;
    assert!(a.active_leases().await.unwrap().is_empty());
}
