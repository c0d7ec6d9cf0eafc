// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel start/stop, lease activation, and channels built from configuration
//! polling a real SQLite file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meridian_bus::{EngineEvent, EventBus};
use chrono::Utc;
use meridian_cluster::{
    InMemoryLeaseStore, LeaseManager, LeaseSettings, ManualClock, ShadowController,
    SharedShadowState,
};
use meridian_config::model::{
    ChannelConfig, DatabaseSourceConfig, InitialState, ResponseSelector, UpdateMode,
};
use meridian_connector::{ConnectorState, SourceConnector};
use meridian_core::{
    ChannelId, ChannelState, ConnectionStatus, ConnectorMessage, ContentType, EngineController,
    LeaseStore, MeridianError, ServerId,
};
use meridian_engine::{
    Channel, ChannelBuilder, ChannelManager, ChannelPipeline, EngineDeps, MessageProcessor,
};
use meridian_test_utils::Journal;

struct StubConnector {
    state: Mutex<ConnectorState>,
    fail_start: AtomicBool,
    journal: Journal,
}

impl StubConnector {
    fn new(journal: Journal) -> Self {
        Self {
            state: Mutex::new(ConnectorState::Undeployed),
            fail_start: AtomicBool::new(false),
            journal,
        }
    }

    fn set(&self, state: ConnectorState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl SourceConnector for StubConnector {
    fn name(&self) -> &str {
        "Stub"
    }

    fn state(&self) -> ConnectorState {
        *self.state.lock().unwrap()
    }

    async fn on_deploy(&self) -> Result<(), MeridianError> {
        self.journal.record("deploy");
        self.set(ConnectorState::Deployed);
        Ok(())
    }

    async fn start(&self) -> Result<(), MeridianError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(MeridianError::Internal("port in use".into()));
        }
        self.journal.record("start");
        self.set(ConnectorState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MeridianError> {
        self.journal.record("stop");
        self.set(ConnectorState::Stopped);
        Ok(())
    }

    async fn on_undeploy(&self) -> Result<(), MeridianError> {
        self.journal.record("undeploy");
        self.set(ConnectorState::Undeployed);
        Ok(())
    }
}

fn lease_manager(
    store: &Arc<InMemoryLeaseStore>,
    server: &str,
    bus: &EventBus,
) -> Arc<LeaseManager> {
    let settings = LeaseSettings {
        ttl: Duration::from_secs(30),
        heartbeat_interval: Duration::from_secs(10),
    };
    Arc::new(LeaseManager::new(
        store.clone(),
        ServerId::from(server),
        settings,
        bus.clone(),
    ))
}

fn stub_channel(id: &str, connector: Arc<StubConnector>) -> Channel {
    let bus = EventBus::default();
    let pipeline = ChannelPipeline::new(ChannelId::from(id), ServerId::from("node-a"), bus);
    Channel::new(format!("{id} channel"), Arc::new(pipeline), connector).clustered(true)
}

#[tokio::test]
async fn clustered_channel_holds_its_lease_while_started() {
    let bus = EventBus::default();
    let store = Arc::new(InMemoryLeaseStore::new());
    let leases = lease_manager(&store, "node-a", &bus);
    let manager = ChannelManager::new().with_lease_manager(leases.clone());
    let journal = Journal::new();
    let id = ChannelId::from("adt-in");

    let channel = manager
        .deploy(stub_channel("adt-in", Arc::new(StubConnector::new(journal.clone()))))
        .await
        .unwrap();
    assert_eq!(channel.state(), ChannelState::Stopped);

    manager.start_channel(&id).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Started);
    assert!(channel.pipeline().is_started());
    assert!(leases.handle("adt-in").is_held());

    // Starting again is a no-op.
    manager.start_channel(&id).await.unwrap();
    assert_eq!(journal.entries(), vec!["deploy", "start"]);

    manager.stop_channel(&id).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Stopped);
    assert!(!leases.handle("adt-in").is_held());

    // Released on stop, so another node takes over without waiting out the TTL.
    let other = lease_manager(&store, "node-b", &bus);
    let handle = other.activate("adt-in").await;
    assert_eq!(handle.fencing_token(), Some(2));
}

#[tokio::test]
async fn failed_start_rolls_back() {
    let bus = EventBus::default();
    let store = Arc::new(InMemoryLeaseStore::new());
    let leases = lease_manager(&store, "node-a", &bus);
    let manager = ChannelManager::new().with_lease_manager(leases.clone());
    let connector = Arc::new(StubConnector::new(Journal::new()));
    connector.fail_start.store(true, Ordering::SeqCst);
    let channel = manager.deploy(stub_channel("adt-in", connector)).await.unwrap();

    let err = manager
        .start_channel(&ChannelId::from("adt-in"))
        .await
        .unwrap_err();
    match err {
        MeridianError::ChannelStart {
            channel_id,
            message,
        } => {
            assert_eq!(channel_id, ChannelId::from("adt-in"));
            assert!(message.contains("port in use"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(channel.state(), ChannelState::Stopped);
    assert!(!channel.pipeline().is_started());
    assert!(!leases.handle("adt-in").is_held());
    let lease = store.get("adt-in").await.unwrap().unwrap();
    assert!(lease.is_expired_at(chrono::Utc::now()));
}

#[tokio::test]
async fn unknown_channel_and_duplicate_deploy() {
    let manager = ChannelManager::new();
    let err = manager
        .start_channel(&ChannelId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, MeridianError::ChannelNotFound(ref id) if id == "missing"));

    let journal = Journal::new();
    manager
        .deploy(stub_channel("a", Arc::new(StubConnector::new(journal.clone()))))
        .await
        .unwrap();
    let err = manager
        .deploy(stub_channel("a", Arc::new(StubConnector::new(journal.clone()))))
        .await
        .unwrap_err();
    assert!(matches!(err, MeridianError::Config(_)));
    assert_eq!(manager.deployed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_stops_and_undeploys_everything() {
    let manager = ChannelManager::new();
    let journal = Journal::new();
    for id in ["a", "b"] {
        manager
            .deploy(stub_channel(id, Arc::new(StubConnector::new(journal.clone()))))
            .await
            .unwrap();
    }
    manager.start_channel(&ChannelId::from("a")).await.unwrap();

    manager.shutdown().await;
    assert_eq!(manager.deployed_count().await.unwrap(), 0);
    assert_eq!(
        journal.entries(),
        vec!["deploy", "deploy", "start", "stop", "undeploy", "undeploy"]
    );
}

// Channels built from configuration.

fn seed(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE inbox (id INTEGER PRIMARY KEY, body TEXT NOT NULL, processed INTEGER NOT NULL DEFAULT 0);
         INSERT INTO inbox (body) VALUES ('MSH|1'), ('MSH|2'), ('MSH|3');",
    )
    .unwrap();
}

fn processed(path: &Path) -> i64 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM inbox WHERE processed = 1", [], |row| row.get(0))
        .unwrap()
}

async fn wait_processed(path: &Path, expected: i64) -> bool {
    for _ in 0..100 {
        if processed(path) == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn inbox_channel(db: &Path, clustered: bool) -> ChannelConfig {
    let mut source = DatabaseSourceConfig::sql(
        db.display().to_string(),
        "SELECT id, body FROM inbox WHERE processed = 0 ORDER BY id",
    );
    source.update = Some("UPDATE inbox SET processed = 1 WHERE id = :id".into());
    source.update_mode = UpdateMode::Each;
    source.poll_interval_ms = 50;
    ChannelConfig {
        id: "inbox".into(),
        name: "Inbox".into(),
        enabled: true,
        initial_state: InitialState::Started,
        clustered,
        response: ResponseSelector::None,
        source,
    }
}

fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("his.db");
    seed(&path);
    (dir, path)
}

#[tokio::test]
async fn configured_channel_polls_and_marks_rows() {
    let (_dir, db) = temp_db();
    let bus = EventBus::default();
    let shadow = SharedShadowState::new(false);
    let deps = EngineDeps::new(ServerId::from("node-a"), bus, shadow.clone());
    let manager = ChannelManager::new();

    let mut disabled = inbox_channel(&db, false);
    disabled.id = "off".into();
    disabled.enabled = false;
    let builder = ChannelBuilder::new(deps);
    let deployed = builder
        .deploy_all(&manager, &[inbox_channel(&db, false), disabled])
        .await
        .unwrap();
    assert_eq!(deployed, 1);

    assert!(manager.start_initial(&shadow).await.is_empty());
    assert!(wait_processed(&db, 3).await, "rows were not processed");
    manager.shutdown().await;
}

#[tokio::test]
async fn shadow_mode_waits_for_promotion() {
    let (_dir, db) = temp_db();
    let bus = EventBus::default();
    let shadow = SharedShadowState::new(true);
    let deps = EngineDeps::new(ServerId::from("node-a"), bus.clone(), shadow.clone());
    let manager = Arc::new(ChannelManager::new());
    ChannelBuilder::new(deps)
        .deploy_all(&manager, &[inbox_channel(&db, false)])
        .await
        .unwrap();

    manager.start_initial(&shadow).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(processed(&db), 0);

    let controller = ShadowController::new(ServerId::from("node-a"), manager.clone(), shadow, bus);
    controller.promote(&ChannelId::from("inbox")).await.unwrap();
    assert!(wait_processed(&db, 3).await, "promoted channel did not poll");
    manager.shutdown().await;
}

#[tokio::test]
async fn only_the_lease_holder_polls() {
    let (_dir, db) = temp_db();
    let store = Arc::new(InMemoryLeaseStore::new());
    let shadow = SharedShadowState::new(false);

    let bus_a = EventBus::default();
    let leases_a = lease_manager(&store, "node-a", &bus_a);
    let mut deps_a = EngineDeps::new(ServerId::from("node-a"), bus_a.clone(), shadow.clone());
    deps_a.lease_manager = Some(leases_a.clone());
    let node_a = ChannelManager::new().with_lease_manager(leases_a);

    let bus_b = EventBus::default();
    let mut rx_b = bus_b.subscribe();
    let leases_b = lease_manager(&store, "node-b", &bus_b);
    let mut deps_b = EngineDeps::new(ServerId::from("node-b"), bus_b.clone(), shadow.clone());
    deps_b.lease_manager = Some(leases_b.clone());
    let node_b = ChannelManager::new().with_lease_manager(leases_b);

    ChannelBuilder::new(deps_a)
        .deploy_all(&node_a, &[inbox_channel(&db, true)])
        .await
        .unwrap();
    ChannelBuilder::new(deps_b)
        .deploy_all(&node_b, &[inbox_channel(&db, true)])
        .await
        .unwrap();

    node_a.start_initial(&shadow).await;
    node_b.start_initial(&shadow).await;
    assert!(wait_processed(&db, 3).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    while let Ok(event) = rx_b.try_recv() {
        if let EngineEvent::ConnectionStatus { status, .. } = event.event {
            assert_ne!(status, ConnectionStatus::Polling, "standby node polled");
        }
    }

    node_b.shutdown().await;
    node_a.shutdown().await;
}

/// Lets another node take the lease over while the first message is in flight.
struct TakeoverProcessor {
    clock: Arc<ManualClock>,
    rival: Arc<LeaseManager>,
    seen: AtomicUsize,
}

#[async_trait]
impl MessageProcessor for TakeoverProcessor {
    async fn transform(&self, source: &ConnectorMessage) -> Result<Option<String>, MeridianError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
            self.clock.advance(Duration::from_secs(31));
            self.rival.activate("inbox").await;
        }
        Ok(source.content(ContentType::Raw).map(str::to_string))
    }
}

#[tokio::test]
async fn superseded_holder_does_not_mark_rows() {
    let (_dir, db) = temp_db();
    let store = Arc::new(InMemoryLeaseStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shadow = SharedShadowState::new(false);
    let bus = EventBus::default();

    let clocked = |server: &str| {
        let settings = LeaseSettings {
            ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        };
        Arc::new(
            LeaseManager::new(store.clone(), ServerId::from(server), settings, bus.clone())
                .with_clock(clock.clone()),
        )
    };
    let leases_a = clocked("node-a");
    let leases_b = clocked("node-b");
    let processor = Arc::new(TakeoverProcessor {
        clock: clock.clone(),
        rival: leases_b.clone(),
        seen: AtomicUsize::new(0),
    });

    let mut deps = EngineDeps::new(ServerId::from("node-a"), bus, shadow.clone());
    deps.lease_manager = Some(leases_a.clone());
    deps.processor = processor.clone();
    let node_a = ChannelManager::new().with_lease_manager(leases_a);
    ChannelBuilder::new(deps)
        .deploy_all(&node_a, &[inbox_channel(&db, true)])
        .await
        .unwrap();

    node_a.start_initial(&shadow).await;
    for _ in 0..100 {
        if processor.seen.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    node_a.shutdown().await;

    assert_eq!(processor.seen.load(Ordering::SeqCst), 1);
    assert_eq!(processed(&db), 0, "a superseded holder wrote to the source");
    let lease = store.get("inbox").await.unwrap().unwrap();
    assert_eq!(lease.holder_server_id, ServerId::from("node-b"));
    assert_eq!(lease.fencing_token, 2);
}
