// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shadow mode and cutover.
//!
//! A node started in shadow mode deploys every channel but lets none of them
//! poll. Operators promote channels one at a time, or cut the whole node over.
//! Cutover is one-way: shadow mode is off afterwards and the node registers
//! itself ONLINE.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use meridian_bus::{EngineEvent, EventBus};
use meridian_core::{
    ChannelId, ChannelState, EngineController, MeridianError, PollDecision, PollGate, ServerId,
    ServerRegistry, ServerStatus,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct ShadowState {
    enabled: bool,
    promoted: BTreeSet<ChannelId>,
}

/// Shadow-mode flag and promoted set, shared by the controller and the gates.
#[derive(Debug, Clone, Default)]
pub struct SharedShadowState {
    inner: Arc<RwLock<ShadowState>>,
}

impl SharedShadowState {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ShadowState {
                enabled,
                promoted: BTreeSet::new(),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.read().enabled
    }

    pub fn is_promoted(&self, channel_id: &ChannelId) -> bool {
        self.read().promoted.contains(channel_id)
    }

    /// A channel may poll when shadow mode is off or it has been promoted.
    pub fn is_active(&self, channel_id: &ChannelId) -> bool {
        let state = self.read();
        !state.enabled || state.promoted.contains(channel_id)
    }

    pub fn promoted(&self) -> Vec<ChannelId> {
        self.read().promoted.iter().cloned().collect()
    }

    pub fn gate(&self, channel_id: ChannelId) -> ShadowGate {
        ShadowGate {
            state: self.clone(),
            channel_id,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ShadowState> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ShadowState> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Lets a channel poll only once it is active under shadow mode.
#[derive(Debug, Clone)]
pub struct ShadowGate {
    state: SharedShadowState,
    channel_id: ChannelId,
}

impl PollGate for ShadowGate {
    fn decide(&self) -> PollDecision {
        if self.state.is_active(&self.channel_id) {
            PollDecision::Proceed {
                fencing_token: None,
            }
        } else {
            PollDecision::Skip {
                reason: "shadow mode: channel not promoted".into(),
            }
        }
    }
}

/// Post-cutover initialization step.
#[async_trait]
pub trait CutoverHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn after_cutover(&self) -> Result<(), MeridianError>;
}

/// A channel that did not start during cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartError {
    pub channel_id: ChannelId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CutoverReport {
    pub promoted: Vec<ChannelId>,
    pub started: Vec<ChannelId>,
    pub start_errors: Vec<StartError>,
    pub hook_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowStatus {
    pub shadow_mode: bool,
    pub promoted_channels: Vec<ChannelId>,
    pub promoted_count: usize,
    pub deployed_count: usize,
    pub server_id: ServerId,
}

/// Promotes, demotes and cuts over channels.
///
/// Control-plane operations are serialized; polling continues unaffected
/// while they run.
pub struct ShadowController {
    server_id: ServerId,
    engine: Arc<dyn EngineController>,
    state: SharedShadowState,
    registry: Option<Arc<dyn ServerRegistry>>,
    bus: EventBus,
    hooks: Vec<Arc<dyn CutoverHook>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl ShadowController {
    pub fn new(
        server_id: ServerId,
        engine: Arc<dyn EngineController>,
        state: SharedShadowState,
        bus: EventBus,
    ) -> Self {
        Self {
            server_id,
            engine,
            state,
            registry: None,
            bus,
            hooks: Vec::new(),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn ServerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn CutoverHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn state(&self) -> &SharedShadowState {
        &self.state
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Records this node in the server registry as SHADOW or ONLINE.
    pub async fn register(&self) -> Result<(), MeridianError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        let status = if self.state.is_enabled() {
            ServerStatus::Shadow
        } else {
            ServerStatus::Online
        };
        registry.register(&self.server_id, status).await?;
        info!(server_id = %self.server_id, %status, "server registered");
        Ok(())
    }

    /// Marks the channel promoted, then starts it. A failed start is rolled
    /// back so the channel stays in shadow.
    pub async fn promote(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        let _op = self.op_lock.lock().await;
        {
            let mut state = self.state.write();
            if !state.enabled {
                return Err(MeridianError::ShadowModeDisabled);
            }
            if !state.promoted.insert(channel_id.clone()) {
                return Err(MeridianError::AlreadyPromoted(channel_id.clone()));
            }
        }

        if let Err(e) = self.engine.start_channel(channel_id).await {
            self.state.write().promoted.remove(channel_id);
            warn!(%channel_id, error = %e, "promotion failed, channel stays in shadow");
            return Err(match e {
                MeridianError::ChannelStart { .. } => e,
                other => MeridianError::ChannelStart {
                    channel_id: channel_id.clone(),
                    message: other.to_string(),
                },
            });
        }

        info!(%channel_id, "channel promoted");
        self.bus.publish(EngineEvent::ChannelPromoted {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Stops the channel (best effort) and returns it to shadow.
    pub async fn demote(&self, channel_id: &ChannelId) -> Result<(), MeridianError> {
        let _op = self.op_lock.lock().await;
        {
            let state = self.state.read();
            if !state.enabled {
                return Err(MeridianError::ShadowModeDisabled);
            }
            if !state.promoted.contains(channel_id) {
                return Err(MeridianError::NotPromoted(channel_id.clone()));
            }
        }

        if let Err(e) = self.engine.stop_channel(channel_id).await {
            warn!(%channel_id, error = %e, "stop failed during demotion, demoting anyway");
        }
        self.state.write().promoted.remove(channel_id);

        info!(%channel_id, "channel demoted");
        self.bus.publish(EngineEvent::ChannelDemoted {
            channel_id: channel_id.clone(),
        });
        Ok(())
    }

    /// Promotes every deployed channel, starts the stopped ones, leaves shadow
    /// mode and runs the post-cutover hooks. Start failures are collected, not
    /// fatal.
    pub async fn cutover(&self) -> Result<CutoverReport, MeridianError> {
        let _op = self.op_lock.lock().await;
        if !self.state.is_enabled() {
            return Err(MeridianError::ShadowModeDisabled);
        }

        let channels = self.engine.channel_statuses().await?;
        let mut report = CutoverReport::default();
        {
            let mut state = self.state.write();
            for channel in &channels {
                state.promoted.insert(channel.channel_id.clone());
            }
            report.promoted = state.promoted.iter().cloned().collect();
        }

        for channel in channels.iter().filter(|c| c.state == ChannelState::Stopped) {
            match self.engine.start_channel(&channel.channel_id).await {
                Ok(()) => report.started.push(channel.channel_id.clone()),
                Err(e) => {
                    warn!(channel_id = %channel.channel_id, error = %e, "channel failed to start during cutover");
                    report.start_errors.push(StartError {
                        channel_id: channel.channel_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.state.write().enabled = false;

        if let Some(registry) = &self.registry
            && let Err(e) = registry.set_status(&self.server_id, ServerStatus::Online).await
        {
            warn!(error = %e, "could not mark server ONLINE");
            report.hook_errors.push(format!("server registry: {e}"));
        }

        for hook in &self.hooks {
            if let Err(e) = hook.after_cutover().await {
                warn!(hook = hook.name(), error = %e, "post-cutover step failed");
                report.hook_errors.push(format!("{}: {e}", hook.name()));
            }
        }

        info!(
            server_id = %self.server_id,
            promoted = report.promoted.len(),
            started = report.started.len(),
            start_errors = report.start_errors.len(),
            "cutover complete, shadow mode disabled"
        );
        self.bus.publish(EngineEvent::CutoverCompleted {
            server_id: self.server_id.clone(),
            started: report.started.len(),
            start_errors: report.start_errors.len(),
        });
        Ok(report)
    }

    pub async fn status(&self) -> Result<ShadowStatus, MeridianError> {
        let deployed_count = self.engine.deployed_count().await?;
        let promoted_channels = self.state.promoted();
        Ok(ShadowStatus {
            shadow_mode: self.state.is_enabled(),
            promoted_count: promoted_channels.len(),
            promoted_channels,
            deployed_count,
            server_id: self.server_id.clone(),
        })
    }
}
