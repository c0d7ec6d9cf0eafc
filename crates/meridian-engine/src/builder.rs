// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channels from configuration.

use std::path::Path;
use std::sync::Arc;

use meridian_bus::EventBus;
use meridian_cluster::{LeaseManager, SharedShadowState};
use meridian_config::model::{ChannelConfig, DatabaseSourceConfig, UpdateMode};
use meridian_connector::{ConnectorContext, DatabaseReceiver, ScriptBundle};
use meridian_core::{
    ChannelId, MeridianError, MessageRouter, ScriptEngine, ScriptSource, ServerId,
};
use tracing::{info, warn};

use crate::gate::CompositeGate;
use crate::manager::{Channel, ChannelManager};
use crate::pipeline::{ChannelPipeline, MessageProcessor, PassthroughProcessor};

/// Name of the database source connector on every channel.
pub const DATABASE_READER: &str = "Database Reader";

/// Shared services every channel is wired to.
#[derive(Clone)]
pub struct EngineDeps {
    pub server_id: ServerId,
    pub bus: EventBus,
    pub shadow: SharedShadowState,
    /// Present when cluster mode is on.
    pub lease_manager: Option<Arc<LeaseManager>>,
    /// Required by channels whose source runs in script mode.
    pub script_engine: Option<Arc<dyn ScriptEngine>>,
    /// Lets scripts route messages to other channels.
    pub router: Option<Arc<dyn MessageRouter>>,
    pub processor: Arc<dyn MessageProcessor>,
}

impl EngineDeps {
    pub fn new(server_id: ServerId, bus: EventBus, shadow: SharedShadowState) -> Self {
        Self {
            server_id,
            bus,
            shadow,
            lease_manager: None,
            script_engine: None,
            router: None,
            processor: Arc::new(PassthroughProcessor),
        }
    }
}

pub struct ChannelBuilder {
    deps: EngineDeps,
}

impl ChannelBuilder {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Assembles a channel: pipeline, poll gate, and database source.
    ///
    /// The gate always includes the shadow gate. A clustered channel also
    /// waits on its lease and has its update writes fenced by it; without
    /// cluster mode it runs as a local channel.
    pub fn build(&self, config: &ChannelConfig) -> Result<Channel, MeridianError> {
        let deps = &self.deps;
        let channel_id = ChannelId::from(config.id.as_str());
        let pipeline = Arc::new(
            ChannelPipeline::new(channel_id.clone(), deps.server_id.clone(), deps.bus.clone())
                .with_processor(Arc::clone(&deps.processor))
                .with_response_selector(config.response),
        );

        let mut gate = CompositeGate::new().with(Arc::new(deps.shadow.gate(channel_id.clone())));
        let mut fence = None;
        let clustered = match (&deps.lease_manager, config.clustered) {
            (Some(leases), true) => {
                gate = gate.with(leases.handle(channel_id.as_str()));
                fence = Some(leases.fence(channel_id.as_str()));
                true
            }
            (None, true) => {
                warn!(%channel_id, "channel is clustered but cluster mode is off, polling locally");
                false
            }
            (_, false) => false,
        };

        let scripts = if config.source.use_script {
            Some(self.script_bundle(&config.source)?)
        } else {
            None
        };
        let mut ctx = ConnectorContext::new(
            channel_id,
            DATABASE_READER,
            pipeline.clone(),
            Arc::new(gate),
            deps.bus.clone(),
        );
        if let Some(fence) = fence {
            ctx = ctx.with_fencing(fence);
        }
        if let Some(router) = &deps.router {
            ctx = ctx.with_router(Arc::clone(router));
        }
        let connector = DatabaseReceiver::new(ctx, config.source.clone(), scripts);

        Ok(Channel::new(config.name.clone(), pipeline, Arc::new(connector))
            .clustered(clustered)
            .with_initial_state(config.initial_state))
    }

    /// Builds and deploys every enabled channel. Stops at the first failure.
    pub async fn deploy_all(
        &self,
        manager: &ChannelManager,
        channels: &[ChannelConfig],
    ) -> Result<usize, MeridianError> {
        let mut deployed = 0;
        for config in channels {
            if !config.enabled {
                info!(channel_id = %config.id, "channel disabled, not deployed");
                continue;
            }
            manager.deploy(self.build(config)?).await?;
            deployed += 1;
        }
        Ok(deployed)
    }

    fn script_bundle(&self, source: &DatabaseSourceConfig) -> Result<ScriptBundle, MeridianError> {
        let engine = self.deps.script_engine.clone().ok_or_else(|| {
            MeridianError::Config("script mode requires a script engine".into())
        })?;
        let update = match source.update_mode {
            UpdateMode::Never => None,
            _ => source.update.as_deref().map(read_script).transpose()?,
        };
        Ok(ScriptBundle {
            engine,
            select: read_script(&source.select)?,
            update,
        })
    }
}

fn read_script(path: &str) -> Result<ScriptSource, MeridianError> {
    let code = std::fs::read(Path::new(path))
        .map_err(|e| MeridianError::Config(format!("cannot read script {path}: {e}")))?;
    Ok(ScriptSource::new(path, code))
}
