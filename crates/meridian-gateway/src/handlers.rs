// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the control plane.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use meridian_core::{ChannelId, ChannelState, Lease, MeridianError, ServerId};
use serde::{Deserialize, Serialize};

use crate::server::GatewayState;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A handler failure rendered as status code plus [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: "bad_request".into(),
                message: message.into(),
            },
        }
    }
}

impl From<MeridianError> for ApiError {
    fn from(e: MeridianError) -> Self {
        let (status, error) = match &e {
            e if e.is_precondition() => (StatusCode::BAD_REQUEST, "precondition_failed"),
            MeridianError::ChannelNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            MeridianError::ChannelStart { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "channel_start_failed")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub shadow_mode: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub channel_id: ChannelId,
    pub name: String,
    pub state: ChannelState,
    pub promoted: bool,
}

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<ChannelEntry>,
}

/// Body of the promote endpoint: one channel, or `all` for a full cutover.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoteRequest {
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelActionResponse {
    pub channel_id: ChannelId,
    pub promoted: bool,
    pub server_id: ServerId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseEntry {
    pub channel_id: String,
    pub holder_server_id: ServerId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fencing_token: u64,
}

impl From<Lease> for LeaseEntry {
    fn from(lease: Lease) -> Self {
        Self {
            channel_id: lease.resource_id,
            holder_server_id: lease.holder_server_id,
            acquired_at: lease.acquired_at,
            expires_at: lease.expires_at,
            fencing_token: lease.fencing_token,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseListResponse {
    pub cluster_enabled: bool,
    pub leases: Vec<LeaseEntry>,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        shadow_mode: state.shadow.state().is_enabled(),
    })
}

/// GET /api/channels
pub async fn get_channels(
    State(state): State<GatewayState>,
) -> Result<Json<ChannelListResponse>, ApiError> {
    let shadow = state.shadow.state();
    let channels = state
        .engine
        .channel_statuses()
        .await?
        .into_iter()
        .map(|status| ChannelEntry {
            promoted: shadow.is_promoted(&status.channel_id),
            channel_id: status.channel_id,
            name: status.name,
            state: status.state,
        })
        .collect();
    Ok(Json(ChannelListResponse { channels }))
}

/// GET /api/system/shadow
pub async fn get_shadow_status(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    Ok(Json(state.shadow.status().await?).into_response())
}

/// POST /api/system/shadow/promote
///
/// `{"channelId": "..."}` promotes one channel; `{"all": true}` cuts the whole
/// node over and returns the cutover report.
pub async fn post_promote(
    State(state): State<GatewayState>,
    Json(body): Json<PromoteRequest>,
) -> Result<Response, ApiError> {
    match (body.all, body.channel_id) {
        (true, _) => {
            let report = state.shadow.cutover().await?;
            Ok(Json(report).into_response())
        }
        (false, Some(channel_id)) => {
            let channel_id = ensure_deployed(&state, &channel_id).await?;
            state.shadow.promote(&channel_id).await?;
            Ok(Json(ChannelActionResponse {
                channel_id,
                promoted: true,
                server_id: state.shadow.server_id().clone(),
            })
            .into_response())
        }
        (false, None) => Err(ApiError::bad_request(
            "request must name a channelId or set all to true",
        )),
    }
}

/// POST /api/system/shadow/demote
pub async fn post_demote(
    State(state): State<GatewayState>,
    Json(body): Json<DemoteRequest>,
) -> Result<Response, ApiError> {
    let channel_id = ensure_deployed(&state, &body.channel_id).await?;
    state.shadow.demote(&channel_id).await?;
    Ok(Json(ChannelActionResponse {
        channel_id,
        promoted: false,
        server_id: state.shadow.server_id().clone(),
    })
    .into_response())
}

/// GET /api/system/cluster/leases
pub async fn get_leases(
    State(state): State<GatewayState>,
) -> Result<Json<LeaseListResponse>, ApiError> {
    let Some(leases) = &state.leases else {
        return Ok(Json(LeaseListResponse {
            cluster_enabled: false,
            leases: Vec::new(),
        }));
    };
    let leases = leases
        .active_leases()
        .await?
        .into_iter()
        .map(LeaseEntry::from)
        .collect();
    Ok(Json(LeaseListResponse {
        cluster_enabled: true,
        leases,
    }))
}

async fn ensure_deployed(state: &GatewayState, channel_id: &str) -> Result<ChannelId, ApiError> {
    let channel_id = ChannelId::from(channel_id);
    let deployed = state
        .engine
        .channel_statuses()
        .await?
        .iter()
        .any(|status| status.channel_id == channel_id);
    if deployed {
        Ok(channel_id)
    } else {
        Err(MeridianError::ChannelNotFound(channel_id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_request_accepts_either_form() {
        let one: PromoteRequest = serde_json::from_str(r#"{"channelId": "adt-in"}"#).unwrap();
        assert_eq!(one.channel_id.as_deref(), Some("adt-in"));
        assert!(!one.all);

        let all: PromoteRequest = serde_json::from_str(r#"{"all": true}"#).unwrap();
        assert!(all.all);
        assert!(all.channel_id.is_none());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (MeridianError::ShadowModeDisabled, StatusCode::BAD_REQUEST),
            (
                MeridianError::AlreadyPromoted(ChannelId::from("a")),
                StatusCode::BAD_REQUEST,
            ),
            (
                MeridianError::ChannelNotFound("a".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                MeridianError::ChannelStart {
                    channel_id: ChannelId::from("a"),
                    message: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status, expected);
        }
    }

    #[test]
    fn error_response_serializes() {
        let resp = ErrorResponse {
            error: "not_found".to_string(),
            message: "channel not found: a".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"], "not_found");
        assert_eq!(json["message"], "channel not found: a");
    }
}
