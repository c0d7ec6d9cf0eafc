// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster lease manager.
//!
//! A resource moves `UNLEASED -> HELD(node, token) -> EXPIRED -> HELD(node', token + 1)`.
//! Every node that wants a resource registers a [`LeaseHandle`] for it; the
//! heartbeat renews held leases and tries to acquire the rest. The handle is
//! the connector's [`PollGate`]: it lets a tick start only while this node
//! holds an unexpired lease, checked against the manager's clock.
//!
//! Any store error counts as "not held". A node that cannot reach the store
//! stops polling rather than risk two writers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use meridian_bus::{EngineEvent, EventBus};
use meridian_config::model::ClusterConfig;
use meridian_core::{
    FencingValidator, Lease, LeaseStore, MeridianError, PollDecision, PollGate, ServerId,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Lease timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub ttl: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&ClusterConfig> for LeaseSettings {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.lease_ttl_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
        }
    }
}

#[derive(Debug, Default)]
struct HandleState {
    active: bool,
    held: Option<Lease>,
}

/// This node's view of one resource's lease.
pub struct LeaseHandle {
    resource_id: String,
    clock: Arc<dyn Clock>,
    state: Mutex<HandleState>,
}

impl LeaseHandle {
    fn new(resource_id: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            resource_id,
            clock,
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Whether the heartbeat is trying to hold this lease.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// The held lease, if it has not expired by the local clock.
    pub fn current(&self) -> Option<Lease> {
        let now = self.clock.now();
        self.lock()
            .held
            .as_ref()
            .filter(|lease| !lease.is_expired_at(now))
            .cloned()
    }

    pub fn is_held(&self) -> bool {
        self.current().is_some()
    }

    pub fn fencing_token(&self) -> Option<u64> {
        self.current().map(|lease| lease.fencing_token)
    }

    fn held(&self) -> Option<Lease> {
        self.lock().held.clone()
    }

    fn set_held(&self, lease: Option<Lease>) {
        self.lock().held = lease;
    }

    fn set_active(&self, active: bool) {
        self.lock().active = active;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl PollGate for LeaseHandle {
    fn decide(&self) -> PollDecision {
        match self.current() {
            Some(lease) => PollDecision::Proceed {
                fencing_token: Some(lease.fencing_token),
            },
            None => PollDecision::Skip {
                reason: format!("lease for {} not held by this node", self.resource_id),
            },
        }
    }
}

impl std::fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LeaseHandle")
            .field("resource_id", &self.resource_id)
            .field("active", &state.active)
            .field("held", &state.held)
            .finish()
    }
}

/// Acquires, renews and releases leases for this node.
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    server_id: ServerId,
    settings: LeaseSettings,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    handles: DashMap<String, Arc<LeaseHandle>>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        server_id: ServerId,
        settings: LeaseSettings,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            server_id,
            settings,
            clock: Arc::new(SystemClock),
            bus,
            handles: DashMap::new(),
        }
    }

    /// Replaces the clock. Call before any handle is created.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn settings(&self) -> LeaseSettings {
        self.settings
    }

    /// The handle for `resource_id`, created inactive on first use.
    pub fn handle(&self, resource_id: &str) -> Arc<LeaseHandle> {
        self.handles
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                Arc::new(LeaseHandle::new(
                    resource_id.to_string(),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Starts contending for `resource_id` and makes one attempt right away.
    pub async fn activate(&self, resource_id: &str) -> Arc<LeaseHandle> {
        let handle = self.handle(resource_id);
        handle.set_active(true);
        self.refresh(&handle).await;
        handle
    }

    /// Stops contending for `resource_id` and releases it if held, so another
    /// node can take over without waiting out the TTL.
    pub async fn deactivate(&self, resource_id: &str) {
        let Some(handle) = self.handles.get(resource_id).map(|h| Arc::clone(h.value())) else {
            return;
        };
        handle.set_active(false);
        self.release(&handle).await;
    }

    /// One heartbeat round over every active handle.
    pub async fn tick(&self) {
        let handles: Vec<Arc<LeaseHandle>> = self
            .handles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles.iter().filter(|h| h.is_active()) {
            self.refresh(handle).await;
        }
    }

    /// Runs [`tick`](Self::tick) every heartbeat interval until `cancel` fires.
    pub fn spawn_heartbeat(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.settings.heartbeat_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => manager.tick().await,
                    _ = cancel.cancelled() => {
                        info!("lease heartbeat shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Checks a fencing token presented by a writer against the store.
    ///
    /// Older tokens are rejected as stale. The current token is rejected once
    /// its lease has lapsed.
    pub async fn validate_token(&self, resource_id: &str, token: u64) -> Result<(), MeridianError> {
        let lease = self.store.get(resource_id).await?;
        let lost = || MeridianError::LeaseLost {
            resource_id: resource_id.to_string(),
        };
        match lease {
            None => Err(lost()),
            Some(lease) if token < lease.fencing_token => Err(MeridianError::StaleFencingToken {
                resource_id: resource_id.to_string(),
                presented: token,
                current: lease.fencing_token,
            }),
            Some(lease) if token > lease.fencing_token || lease.is_expired_at(self.clock.now()) => {
                Err(lost())
            }
            Some(_) => Ok(()),
        }
    }

    /// A validator that checks tokens for `resource_id` against the store.
    pub fn fence(self: &Arc<Self>, resource_id: &str) -> Arc<LeaseFence> {
        Arc::new(LeaseFence {
            manager: Arc::clone(self),
            resource_id: resource_id.to_string(),
        })
    }

    /// Unexpired leases across the cluster.
    pub async fn active_leases(&self) -> Result<Vec<Lease>, MeridianError> {
        let now = self.clock.now();
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|lease| !lease.is_expired_at(now))
            .collect())
    }

    /// Releases every lease this node holds. Used on shutdown.
    pub async fn release_all(&self) {
        let handles: Vec<Arc<LeaseHandle>> = self
            .handles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            handle.set_active(false);
            self.release(&handle).await;
        }
    }

    async fn refresh(&self, handle: &LeaseHandle) {
        let now = self.clock.now();
        let resource_id = handle.resource_id();

        if let Some(lease) = handle.held() {
            match self
                .store
                .renew(resource_id, &self.server_id, lease.fencing_token, self.settings.ttl, now)
                .await
            {
                Ok(Some(renewed)) => {
                    debug!(resource_id, expires_at = %renewed.expires_at, "lease renewed");
                    handle.set_held(Some(renewed));
                }
                Ok(None) => self.lost(handle, &lease, "renewal rejected"),
                Err(e) => {
                    warn!(resource_id, error = %e, "lease store unreachable during renewal");
                    self.lost(handle, &lease, "store unavailable");
                }
            }
            return;
        }

        match self
            .store
            .try_acquire(resource_id, &self.server_id, self.settings.ttl, now)
            .await
        {
            Ok(Some(lease)) => {
                info!(
                    resource_id,
                    fencing_token = lease.fencing_token,
                    "lease acquired"
                );
                self.bus.publish(EngineEvent::LeaseAcquired {
                    resource_id: resource_id.to_string(),
                    server_id: self.server_id.clone(),
                    fencing_token: lease.fencing_token,
                });
                handle.set_held(Some(lease));
            }
            Ok(None) => debug!(resource_id, "lease held by another node"),
            Err(e) => warn!(resource_id, error = %e, "lease store unreachable, treating lease as not held"),
        }
    }

    fn lost(&self, handle: &LeaseHandle, lease: &Lease, reason: &str) {
        handle.set_held(None);
        warn!(
            resource_id = handle.resource_id(),
            fencing_token = lease.fencing_token,
            reason,
            "lease lost, polling stops"
        );
        self.bus.publish(EngineEvent::LeaseLost {
            resource_id: handle.resource_id().to_string(),
            server_id: self.server_id.clone(),
            fencing_token: lease.fencing_token,
        });
    }

    async fn release(&self, handle: &LeaseHandle) {
        let Some(lease) = handle.held() else {
            return;
        };
        handle.set_held(None);
        match self
            .store
            .release(handle.resource_id(), &self.server_id, lease.fencing_token)
            .await
        {
            Ok(true) => info!(resource_id = handle.resource_id(), "lease released"),
            Ok(false) => debug!(resource_id = handle.resource_id(), "lease was already gone"),
            Err(e) => warn!(
                resource_id = handle.resource_id(),
                error = %e,
                "lease release failed; it will lapse at its TTL"
            ),
        }
    }
}

/// Fencing check for one resource, handed to the connector that writes to it.
pub struct LeaseFence {
    manager: Arc<LeaseManager>,
    resource_id: String,
}

#[async_trait]
impl FencingValidator for LeaseFence {
    async fn validate(&self, fencing_token: u64) -> Result<(), MeridianError> {
        self.manager
            .validate_token(&self.resource_id, fencing_token)
            .await
            .inspect_err(|e| {
                warn!(
                    resource_id = %self.resource_id,
                    fencing_token,
                    error = %e,
                    "fencing check failed, write refused"
                );
            })
    }
}

impl std::fmt::Debug for LeaseFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseFence")
            .field("resource_id", &self.resource_id)
            .finish_non_exhaustive()
    }
}
