// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source connector lifecycle.
//!
//! ```text
//! UNDEPLOYED --on_deploy--> DEPLOYED --start--> RUNNING --stop--> STOPPED
//!      ^                                           ^                 |
//!      |                                           +------start------+
//!      +------------------------on_undeploy------------------------+
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meridian_bus::{EngineEvent, EventBus};
use meridian_core::{
    ChannelId, ConnectionStatus, FencingValidator, MeridianError, MessageRouter, PollGate,
    SourceDispatcher,
};
use strum::Display;
use tracing::debug;

/// Where a connector is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    Undeployed,
    Deployed,
    Running,
    Stopped,
}

/// A channel's source: produces raw messages and hands them to the channel.
#[async_trait]
pub trait SourceConnector: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn state(&self) -> ConnectorState;

    /// Validates settings and acquires long-lived resources (pools, compiled
    /// scripts). A failure leaves the connector `UNDEPLOYED`.
    async fn on_deploy(&self) -> Result<(), MeridianError>;

    /// Begins producing messages.
    async fn start(&self) -> Result<(), MeridianError>;

    /// Stops producing messages. Work already in progress is allowed to finish.
    async fn stop(&self) -> Result<(), MeridianError>;

    /// Releases everything acquired in `on_deploy`, stopping first if needed.
    async fn on_undeploy(&self) -> Result<(), MeridianError>;
}

/// What a connector needs from its channel.
#[derive(Clone)]
pub struct ConnectorContext {
    pub channel_id: ChannelId,
    pub connector_name: String,
    pub dispatcher: Arc<dyn SourceDispatcher>,
    pub gate: Arc<dyn PollGate>,
    pub bus: EventBus,
    /// Checks the gate's fencing token before each update write.
    pub fencing: Option<Arc<dyn FencingValidator>>,
    /// Handed to scripts so they can route to other channels.
    pub router: Option<Arc<dyn MessageRouter>>,
}

impl ConnectorContext {
    pub fn new(
        channel_id: ChannelId,
        connector_name: impl Into<String>,
        dispatcher: Arc<dyn SourceDispatcher>,
        gate: Arc<dyn PollGate>,
        bus: EventBus,
    ) -> Self {
        Self {
            channel_id,
            connector_name: connector_name.into(),
            dispatcher,
            gate,
            bus,
            fencing: None,
            router: None,
        }
    }

    pub fn with_fencing(mut self, fencing: Arc<dyn FencingValidator>) -> Self {
        self.fencing = Some(fencing);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn MessageRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Publishes a connection status change for this connector.
    pub fn publish_status(&self, status: ConnectionStatus) {
        self.bus.publish(EngineEvent::ConnectionStatus {
            channel_id: self.channel_id.clone(),
            connector: self.connector_name.clone(),
            status,
        });
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> MeridianError {
        MeridianError::connector(&self.channel_id, &self.connector_name, message)
    }
}

impl std::fmt::Debug for ConnectorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorContext")
            .field("channel_id", &self.channel_id)
            .field("connector_name", &self.connector_name)
            .field("fenced", &self.fencing.is_some())
            .finish_non_exhaustive()
    }
}

/// Lifecycle state with checked transitions.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<ConnectorState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectorState::Undeployed),
        }
    }

    pub(crate) fn get(&self) -> ConnectorState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Moves to `to` if the current state is one of `from`.
    pub(crate) fn transition(
        &self,
        ctx: &ConnectorContext,
        from: &[ConnectorState],
        to: ConnectorState,
    ) -> Result<ConnectorState, MeridianError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let current = *state;
        if !from.contains(&current) {
            return Err(ctx.error(format!("cannot move from {current} to {to}")));
        }
        *state = to;
        debug!(
            channel_id = %ctx.channel_id,
            connector = %ctx.connector_name,
            from = %current,
            to = %to,
            "connector state change"
        );
        Ok(current)
    }

    pub(crate) fn set(&self, to: ConnectorState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}
