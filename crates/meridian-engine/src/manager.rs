// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deployed channels and their start/stop control.
//!
//! Starting a clustered channel activates its lease before the connector's
//! schedule begins; stopping it releases the lease after the last tick has
//! finished.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use meridian_cluster::{LeaseHandle, LeaseManager, SharedShadowState, StartError};
use meridian_config::model::InitialState;
use meridian_connector::SourceConnector;
use meridian_core::{
    ChannelId, ChannelResolver, ChannelState, ChannelStatus, EngineController, MeridianError,
    ResolvedChannel,
};
use tracing::{debug, error, info, warn};

use crate::pipeline::ChannelPipeline;

/// A deployed channel: its dispatch path plus the source that feeds it.
pub struct Channel {
    id: ChannelId,
    name: String,
    pipeline: Arc<ChannelPipeline>,
    connector: Arc<dyn SourceConnector>,
    clustered: bool,
    initial_state: InitialState,
    state: Mutex<ChannelState>,
    op: tokio::sync::Mutex<()>,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        pipeline: Arc<ChannelPipeline>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        Self {
            id: pipeline.channel_id().clone(),
            name: name.into(),
            pipeline,
            connector,
            clustered: false,
            initial_state: InitialState::Started,
            state: Mutex::new(ChannelState::Stopped),
            op: tokio::sync::Mutex::new(()),
        }
    }

    /// Polls only while this node holds the channel's lease.
    pub fn clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    pub fn with_initial_state(mut self, initial_state: InitialState) -> Self {
        self.initial_state = initial_state;
        self
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Arc<ChannelPipeline> {
        &self.pipeline
    }

    pub fn connector(&self) -> &Arc<dyn SourceConnector> {
        &self.connector
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            channel_id: self.id.clone(),
            name: self.name.clone(),
            state: self.state(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("clustered", &self.clustered)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Every channel deployed on this node.
#[derive(Default)]
pub struct ChannelManager {
    channels: DashMap<ChannelId, Arc<Channel>>,
    lease_manager: Option<Arc<LeaseManager>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_manager(mut self, lease_manager: Arc<LeaseManager>) -> Self {
        self.lease_manager = Some(lease_manager);
        self
    }

    pub fn lease_manager(&self) -> Option<&Arc<LeaseManager>> {
        self.lease_manager.as_ref()
    }

    /// Deploys the channel's connector and registers the channel, stopped.
    pub async fn deploy(&self, channel: Channel) -> Result<Arc<Channel>, MeridianError> {
        if self.channels.contains_key(channel.id()) {
            return Err(MeridianError::Config(format!(
                "channel {} is already deployed",
                channel.id()
            )));
        }
        channel.connector.on_deploy().await?;

        let channel = Arc::new(channel);
        self.channels
            .insert(channel.id.clone(), Arc::clone(&channel));
        info!(channel_id = %channel.id, name = %channel.name, "channel deployed");
        Ok(channel)
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(channel_id).map(|c| Arc::clone(c.value()))
    }

    /// Deployed channels ordered by id.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        let mut channels: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        channels
    }

    /// The lease handle of a clustered channel, if cluster mode is on.
    pub fn lease_of(&self, channel_id: &ChannelId) -> Option<Arc<LeaseHandle>> {
        let channel = self.get(channel_id)?;
        if !channel.clustered {
            return None;
        }
        self.lease_manager
            .as_ref()
            .map(|manager| manager.handle(channel_id.as_str()))
    }

    /// Starts the channels configured to start on deploy. In shadow mode
    /// nothing starts; channels wait for promotion.
    pub async fn start_initial(&self, shadow: &SharedShadowState) -> Vec<StartError> {
        if shadow.is_enabled() {
            info!(
                deployed = self.channels.len(),
                "shadow mode: channels deployed but not started"
            );
            return Vec::new();
        }

        let mut errors = Vec::new();
        for channel in self.channels() {
            if channel.initial_state != InitialState::Started {
                debug!(channel_id = %channel.id, "channel left stopped after deploy");
                continue;
            }
            if let Err(e) = self.start_channel(&channel.id).await {
                error!(channel_id = %channel.id, error = %e, "channel failed to start");
                errors.push(StartError {
                    channel_id: channel.id.clone(),
                    message: e.to_string(),
                });
            }
        }
        errors
    }

    /// Stops every started channel, waiting for in-flight ticks.
    pub async fn stop_all(&self) {
        for channel in self.channels() {
            if let Err(e) = self.stop_channel(&channel.id).await {
                warn!(channel_id = %channel.id, error = %e, "channel did not stop cleanly");
            }
        }
    }

    /// Stops and undeploys every channel.
    pub async fn shutdown(&self) {
        self.stop_all().await;
        for channel in self.channels() {
            if let Err(e) = channel.connector.on_undeploy().await {
                warn!(channel_id = %channel.id, error = %e, "undeploy failed");
            }
            self.channels.remove(&channel.id);
        }
        if let Some(manager) = &self.lease_manager {
            manager.release_all().await;
        }
        info!("all channels undeployed");
    }

    fn require(&self, channel_id: &ChannelId) -> Result<Arc<Channel>, MeridianError> {
        self.get(channel_id)
            .ok_or_else(|| MeridianError::ChannelNotFound(channel_id.to_string()))
    }

    fn lease_for(&self, channel: &Channel) -> Option<&Arc<LeaseManager>> {
        if channel.clustered {
            self.lease_manager.as_ref()
        } else {
            None
        }
    }
}

#[async_trait]
impl EngineController for ChannelManager {
    async fn start_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        let channel = self.require(channel_id)?;
        let _op = channel.op.lock().await;
        if channel.state() == ChannelState::Started {
            return Ok(());
        }

        channel.set_state(ChannelState::Starting);
        if let Some(leases) = self.lease_for(&channel) {
            let handle = leases.activate(channel_id.as_str()).await;
            debug!(%channel_id, held = handle.is_held(), "lease contention started");
        }
        channel.pipeline.set_started(true);

        if let Err(e) = channel.connector.start().await {
            channel.pipeline.set_started(false);
            if let Some(leases) = self.lease_for(&channel) {
                leases.deactivate(channel_id.as_str()).await;
            }
            channel.set_state(ChannelState::Stopped);
            return Err(MeridianError::ChannelStart {
                channel_id: channel_id.clone(),
                message: e.to_string(),
            });
        }

        channel.set_state(ChannelState::Started);
        info!(%channel_id, "channel started");
        Ok(())
    }

    async fn stop_channel(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        let channel = self.require(channel_id)?;
        let _op = channel.op.lock().await;
        if channel.state() == ChannelState::Stopped {
            return Ok(());
        }

        channel.set_state(ChannelState::Stopping);
        if let Err(e) = channel.connector.stop().await {
            channel.set_state(ChannelState::Started);
            return Err(MeridianError::ChannelStop {
                channel_id: channel_id.clone(),
                message: e.to_string(),
            });
        }
        channel.pipeline.set_started(false);
        if let Some(leases) = self.lease_for(&channel) {
            leases.deactivate(channel_id.as_str()).await;
        }

        channel.set_state(ChannelState::Stopped);
        info!(%channel_id, "channel stopped");
        Ok(())
    }

    async fn channel_statuses(&self) -> Result<Vec<ChannelStatus>, MeridianError> {
        Ok(self.channels().iter().map(|c| c.status()).collect())
    }

    async fn deployed_count(&self) -> Result<usize, MeridianError> {
        Ok(self.channels.len())
    }
}

impl ChannelResolver for ChannelManager {
    /// Exact name match first, then id.
    fn resolve(&self, name_or_id: &str) -> Option<ResolvedChannel> {
        let by_name = self
            .channels
            .iter()
            .find(|entry| entry.value().name == name_or_id)
            .map(|entry| Arc::clone(entry.value()));
        let channel = by_name.or_else(|| self.get(&ChannelId::from(name_or_id)))?;
        Some(ResolvedChannel {
            channel_id: channel.id.clone(),
            name: channel.name.clone(),
            dispatcher: channel.pipeline.clone(),
        })
    }
}
