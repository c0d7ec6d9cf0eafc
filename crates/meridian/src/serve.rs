// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `meridian serve` command implementation.
//!
//! Opens the coordination database, deploys every configured channel, starts
//! the lease heartbeat and the control plane, and runs until SIGINT/SIGTERM.
//! On shutdown all channels stop (in-flight ticks finish), held leases are
//! released and the WAL is checkpointed.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_bus::{EngineEvent, EventBus};
use meridian_cluster::{
    CutoverHook, LeaseManager, LeaseSettings, ShadowController, SharedShadowState,
};
use meridian_config::MeridianConfig;
use meridian_core::{MeridianError, ScriptEngine, ServerId, ServerRegistry, ServerStatus};
use meridian_engine::{ChannelBuilder, ChannelManager, ChannelRouter, EngineDeps};
use meridian_gateway::{AuthConfig, GatewayState, ServerConfig};
use meridian_script::{SandboxLimits, WasmScriptEngine};
use meridian_storage::{Database, SqliteLeaseStore, SqliteServerRegistry};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::shutdown;

/// Checkpoints the coordination database once the node has cut over, so the
/// ONLINE registry row is durable in the main database file.
struct CheckpointAfterCutover {
    db: Database,
}

#[async_trait]
impl CutoverHook for CheckpointAfterCutover {
    fn name(&self) -> &str {
        "wal-checkpoint"
    }

    async fn after_cutover(&self) -> Result<(), MeridianError> {
        self.db.checkpoint().await
    }
}

pub async fn run_serve(config: MeridianConfig) -> Result<(), MeridianError> {
    init_tracing(&config.server.log_level);

    let server_id = ServerId::from(config.server.server_id.clone());
    info!(
        %server_id,
        channels = config.channels.len(),
        cluster = config.cluster.enabled,
        shadow = config.shadow.enabled,
        "starting meridian serve"
    );

    let db = Database::open_with_config(&config.storage).await?;
    let bus = EventBus::default();
    let shadow = SharedShadowState::new(config.shadow.enabled);

    let lease_manager = config.cluster.enabled.then(|| {
        Arc::new(LeaseManager::new(
            Arc::new(SqliteLeaseStore::new(db.clone())),
            server_id.clone(),
            LeaseSettings::from(&config.cluster),
            bus.clone(),
        ))
    });

    let script_engine: Arc<dyn ScriptEngine> =
        Arc::new(WasmScriptEngine::new(SandboxLimits::from(&config.script))?);

    let manager = match &lease_manager {
        Some(leases) => ChannelManager::new().with_lease_manager(Arc::clone(leases)),
        None => ChannelManager::new(),
    };
    let manager = Arc::new(manager);

    let mut deps = EngineDeps::new(server_id.clone(), bus.clone(), shadow.clone());
    deps.lease_manager = lease_manager.clone();
    deps.script_engine = Some(script_engine);
    // Shutdown undeploys every channel, which drops the routers they hold.
    deps.router = Some(Arc::new(ChannelRouter::new(manager.clone())));
    let deployed = ChannelBuilder::new(deps)
        .deploy_all(&manager, &config.channels)
        .await
        .inspect_err(|e| error!(error = %e, "channel deployment failed"))?;

    let registry = Arc::new(SqliteServerRegistry::new(db.clone()));
    let controller = Arc::new(
        ShadowController::new(server_id.clone(), manager.clone(), shadow.clone(), bus.clone())
            .with_registry(registry.clone())
            .with_hook(Arc::new(CheckpointAfterCutover { db: db.clone() })),
    );
    controller.register().await?;

    let cancel = shutdown::install_signal_handler();
    let event_log = tokio::spawn(log_events(bus.subscribe(), cancel.clone()));
    let heartbeat = lease_manager
        .as_ref()
        .map(|leases| leases.spawn_heartbeat(cancel.clone()));

    let start_errors = manager.start_initial(&shadow).await;
    info!(
        deployed,
        start_failures = start_errors.len(),
        shadow_mode = shadow.is_enabled(),
        "channels deployed"
    );

    let gateway = if config.gateway.enabled {
        let server_config = ServerConfig {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
        };
        let auth = AuthConfig {
            bearer_token: config.gateway.bearer_token.clone(),
        };
        let mut state = GatewayState::new(manager.clone(), controller.clone(), auth);
        if let Some(leases) = &lease_manager {
            state = state.with_leases(Arc::clone(leases));
        }
        let gateway_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) =
                meridian_gateway::start_server(&server_config, state, gateway_cancel.clone()).await
            {
                error!(error = %e, "control plane failed");
                gateway_cancel.cancel();
            }
        }))
    } else {
        info!("control plane disabled");
        None
    };

    cancel.cancelled().await;
    info!("shutting down");

    manager.shutdown().await;
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    if let Some(gateway) = gateway {
        let _ = gateway.await;
    }
    let _ = event_log.await;

    if let Err(e) = registry.set_status(&server_id, ServerStatus::Offline).await {
        warn!(error = %e, "could not mark server OFFLINE");
    }
    db.checkpoint().await?;

    info!("meridian serve shutdown complete");
    Ok(())
}

/// Logs engine events until `cancel` fires.
async fn log_events(mut rx: broadcast::Receiver<meridian_bus::BusEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(envelope) => log_event(&envelope.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::ConnectionStatus {
            channel_id,
            connector,
            status,
        } => debug!(%channel_id, %connector, %status, "connection status"),
        EngineEvent::MessageTerminal {
            channel_id,
            message_id,
            meta_data_id,
            status,
        } => debug!(%channel_id, message_id, meta_data_id, %status, "message finished"),
        EngineEvent::LeaseLost { resource_id, .. } => {
            warn!(%resource_id, "lease lost, polling suspended")
        }
        other => info!(event = ?other, "engine event"),
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("meridian={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
