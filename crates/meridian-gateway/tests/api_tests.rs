// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control-plane API tests driven through the axum router in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use meridian_bus::EventBus;
use meridian_cluster::{
    InMemoryLeaseStore, LeaseManager, LeaseSettings, ShadowController, SharedShadowState,
};
use meridian_core::{ChannelState, ServerId};
use meridian_gateway::{AuthConfig, GatewayState, router};
use meridian_test_utils::MockEngineController;
use serde_json::{Value, json};
use tower::ServiceExt;

const TOKEN: &str = "ops-token";
const PROMOTE: &str = "/api/system/shadow/promote";
const DEMOTE: &str = "/api/system/shadow/demote";

struct Harness {
    engine: Arc<MockEngineController>,
    state: GatewayState,
}

fn harness(shadow_enabled: bool) -> Harness {
    let engine = Arc::new(
        MockEngineController::new()
            .with_channel("adt-in", ChannelState::Stopped)
            .with_channel("lab-out", ChannelState::Stopped),
    );
    let shadow = Arc::new(ShadowController::new(
        ServerId::from("node-a"),
        engine.clone(),
        SharedShadowState::new(shadow_enabled),
        EventBus::default(),
    ));
    let state = GatewayState::new(engine.clone(), shadow, AuthConfig::bearer(TOKEN));
    Harness { engine, state }
}

async fn call(
    state: &GatewayState,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(state: &GatewayState, uri: &str) -> (StatusCode, Value) {
    call(state, "GET", uri, None).await
}

async fn post(state: &GatewayState, uri: &str, body: Value) -> (StatusCode, Value) {
    call(state, "POST", uri, Some(body)).await
}

#[tokio::test]
async fn health_needs_no_token() {
    let h = harness(true);
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let response = router(h.state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["shadowMode"], true);
}

#[tokio::test]
async fn api_requires_the_bearer_token() {
    let h = harness(true);
    let request = Request::get("/api/system/shadow").body(Body::empty()).unwrap();
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut open = h.state;
    open.auth = AuthConfig::default();
    let request = Request::get("/api/system/shadow")
        .header("authorization", "Bearer ")
        .body(Body::empty())
        .unwrap();
    let response = router(open).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn promote_then_reject_repeat() {
    let h = harness(true);

    let (status, body) = post(&h.state, PROMOTE, json!({"channelId": "adt-in"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channelId"], "adt-in");
    assert_eq!(body["promoted"], true);
    assert_eq!(h.engine.state_of("adt-in"), Some(ChannelState::Started));

    let (status, body) = get(&h.state, "/api/system/shadow").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shadowMode"], true);
    assert_eq!(body["promotedChannels"], json!(["adt-in"]));
    assert_eq!(body["promotedCount"], 1);
    assert_eq!(body["deployedCount"], 2);
    assert_eq!(body["serverId"], "node-a");

    let (status, body) = post(&h.state, PROMOTE, json!({"channelId": "adt-in"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "precondition_failed");
    assert!(body["message"].as_str().unwrap().contains("already promoted"));
}

#[tokio::test]
async fn promote_errors_carry_status_codes() {
    let h = harness(true);

    let (status, body) = post(&h.state, PROMOTE, json!({"channelId": "nope"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = post(&h.state, PROMOTE, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    h.engine.fail_start("adt-in", "database unreachable");
    let (status, body) = post(&h.state, PROMOTE, json!({"channelId": "adt-in"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "channel_start_failed");
    assert!(body["message"].as_str().unwrap().contains("adt-in"));
    assert!(!h.state.shadow.state().is_promoted(&"adt-in".into()));
}

#[tokio::test]
async fn demote_requires_a_promoted_channel() {
    let h = harness(true);
    let (status, body) = post(&h.state, DEMOTE, json!({"channelId": "adt-in"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "precondition_failed");

    post(&h.state, PROMOTE, json!({"channelId": "adt-in"})).await;
    let (status, body) = post(&h.state, DEMOTE, json!({"channelId": "adt-in"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promoted"], false);
    assert_eq!(h.engine.state_of("adt-in"), Some(ChannelState::Stopped));
}

#[tokio::test]
async fn promote_all_cuts_over() {
    let h = harness(true);
    h.engine.fail_start("lab-out", "port in use");

    let (status, body) = post(&h.state, PROMOTE, json!({"all": true})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], json!(["adt-in"]));
    assert_eq!(body["startErrors"][0]["channelId"], "lab-out");

    let (_, shadow) = get(&h.state, "/api/system/shadow").await;
    assert_eq!(shadow["shadowMode"], false);

    let (status, _) = post(&h.state, PROMOTE, json!({"all": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn channels_list_includes_promoted_flag() {
    let h = harness(true);
    post(&h.state, PROMOTE, json!({"channelId": "lab-out"})).await;

    let (status, body) = get(&h.state, "/api/channels").await;
    assert_eq!(status, StatusCode::OK);
    let channels = body["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0]["channelId"], "adt-in");
    assert_eq!(channels[0]["promoted"], false);
    assert_eq!(channels[1]["state"], "STARTED");
    assert_eq!(channels[1]["promoted"], true);
}

#[tokio::test]
async fn lease_inventory() {
    let h = harness(false);
    let (status, body) = get(&h.state, "/api/system/cluster/leases").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clusterEnabled"], false);
    assert_eq!(body["leases"], json!([]));

    let leases = Arc::new(LeaseManager::new(
        Arc::new(InMemoryLeaseStore::new()),
        ServerId::from("node-a"),
        LeaseSettings {
            ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        },
        EventBus::default(),
    ));
    leases.activate("adt-in").await;
    let state = h.state.with_leases(leases);

    let (status, body) = get(&state, "/api/system/cluster/leases").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clusterEnabled"], true);
    let lease = &body["leases"][0];
    assert_eq!(lease["channelId"], "adt-in");
    assert_eq!(lease["holderServerId"], "node-a");
    assert_eq!(lease["fencingToken"], 1);
    assert!(lease["expiresAt"].is_string());
}
