// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane HTTP server built on axum.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use meridian_cluster::{LeaseManager, ShadowController};
use meridian_core::{EngineController, MeridianError};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<dyn EngineController>,
    pub shadow: Arc<ShadowController>,
    /// Present when cluster mode is on.
    pub leases: Option<Arc<LeaseManager>>,
    pub auth: AuthConfig,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(
        engine: Arc<dyn EngineController>,
        shadow: Arc<ShadowController>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            engine,
            shadow,
            leases: None,
            auth,
            started_at: Instant::now(),
        }
    }

    pub fn with_leases(mut self, leases: Arc<LeaseManager>) -> Self {
        self.leases = Some(leases);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Builds the route table:
/// - GET /health (no auth)
/// - GET /api/channels
/// - GET /api/system/shadow
/// - POST /api/system/shadow/promote
/// - POST /api/system/shadow/demote
/// - GET /api/system/cluster/leases
pub fn router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/api/channels", get(handlers::get_channels))
        .route("/api/system/shadow", get(handlers::get_shadow_status))
        .route("/api/system/shadow/promote", post(handlers::post_promote))
        .route("/api/system/shadow/demote", post(handlers::post_demote))
        .route("/api/system/cluster/leases", get(handlers::get_leases))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serves the control plane until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), MeridianError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MeridianError::Config(format!("failed to bind control plane to {addr}: {e}")))?;

    tracing::info!("control plane listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| MeridianError::Internal(format!("control plane server error: {e}")))?;

    tracing::info!("control plane stopped");
    Ok(())
}
