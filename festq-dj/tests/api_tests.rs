//! HTTP API integration tests
//!
//! Drives the router with `tower::ServiceExt::oneshot` over an in-memory
//! database.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use festq_common::api::calculate_hash;
use festq_common::db::init_memory_database;
use festq_common::time;
use festq_dj::api::{build_router, AppContext};
use festq_dj::config::ServiceConfig;
use festq_dj::db::SqliteStore;
use festq_dj::DjService;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_context(shared_secret: i64) -> AppContext {
    let pool = init_memory_database().await.unwrap();
    let service = DjService::new(Arc::new(SqliteStore::new(pool)), ServiceConfig::manual());
    AppContext {
        service: Arc::new(service),
        shared_secret,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Add `timestamp` and `hash` fields signed with `secret`
fn signed(mut body: Value, secret: i64) -> Value {
    body["timestamp"] = json!(time::now_millis());
    body["hash"] = json!("");
    let hash = calculate_hash(&body, secret);
    body["hash"] = json!(hash);
    body
}

async fn add_track(app: &Router, title: &str) -> String {
    let (status, body) = send(
        app,
        post(
            "/api/v1/admin/tracks",
            json!({"title": title, "artist": "Live Act", "durationSeconds": 240}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_module() {
    let app = build_router(test_context(0).await);
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "festq-dj");
}

#[tokio::test]
async fn track_search_is_case_insensitive() {
    let app = build_router(test_context(0).await);
    add_track(&app, "Midnight Pulse").await;
    add_track(&app, "Sunrise").await;

    let (status, body) = send(&app, get("/api/v1/tracks?q=PULSE")).await;
    assert_eq!(status, StatusCode::OK);
    let tracks = body.as_array().unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0]["title"], "Midnight Pulse");

    let (_, body) = send(&app, get("/api/v1/tracks")).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn vote_flow_and_duplicate_vote_is_soft_failure() {
    let app = build_router(test_context(0).await);
    let a = add_track(&app, "A").await;
    let b = add_track(&app, "B").await;

    let (status, round) = send(
        &app,
        post(
            "/api/v1/admin/rounds",
            json!({"candidateTrackIds": [a, b], "durationSeconds": 300}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let round_id = round["roundId"].as_str().unwrap().to_string();

    let vote = json!({"roundId": round_id, "voterId": "phone-1", "trackId": a});
    let (status, body) = send(&app, post("/api/v1/votes", vote.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["tally"]["totalVotes"], 1);

    let (status, body) = send(&app, post("/api/v1/votes", vote)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "already voted this round");
    assert_eq!(body["tally"]["totalVotes"], 1);

    let (status, body) = send(&app, get("/api/v1/rounds/current")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roundId"], round_id.as_str());
    assert_eq!(body["status"], "open");
}

#[tokio::test]
async fn vote_for_non_candidate_rejected() {
    let app = build_router(test_context(0).await);
    let a = add_track(&app, "A").await;
    let outsider = add_track(&app, "Outsider").await;

    let (_, round) = send(
        &app,
        post("/api/v1/admin/rounds", json!({"candidateTrackIds": [a]})),
    )
    .await;
    let round_id = round["roundId"].as_str().unwrap();

    let (status, body) = send(
        &app,
        post(
            "/api/v1/votes",
            json!({"roundId": round_id, "voterId": "v", "trackId": outsider}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn promote_on_empty_queue_is_soft_failure() {
    let app = build_router(test_context(0).await);

    let (status, body) = send(&app, post("/api/v1/admin/queue/promote", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "waiting for votes");
}

#[tokio::test]
async fn close_round_moves_winner_to_playback() {
    let app = build_router(test_context(0).await);
    let a = add_track(&app, "A").await;
    let b = add_track(&app, "B").await;

    let (_, round) = send(
        &app,
        post("/api/v1/admin/rounds", json!({"candidateTrackIds": [a, b]})),
    )
    .await;
    let round_id = round["roundId"].as_str().unwrap().to_string();
    for (voter, track) in [("v1", &b), ("v2", &b), ("v3", &a)] {
        send(
            &app,
            post(
                "/api/v1/votes",
                json!({"roundId": round_id, "voterId": voter, "trackId": track}),
            ),
        )
        .await;
    }

    let uri = format!("/api/v1/admin/rounds/{}/close", round_id);
    let (status, tally) = send(&app, post(&uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tally["status"], "closed");

    let (_, playback) = send(&app, get("/api/v1/playback")).await;
    assert_eq!(playback["state"], "playing");
    assert_eq!(playback["nowPlaying"]["trackId"], b.as_str());

    let (_, queue) = send(&app, get("/api/v1/queue")).await;
    assert_eq!(queue["playing"]["trackId"], b.as_str());
    assert_eq!(queue["order"][0]["trackId"], a.as_str());
}

#[tokio::test]
async fn listener_gets_403_on_admin_routes() {
    let app = build_router(test_context(42).await);

    let (status, body) = send(
        &app,
        post(
            "/api/v1/admin/tracks",
            json!({"title": "A", "artist": "B", "durationSeconds": 100}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "unauthorized");

    // Public routes stay open
    let (status, _) = send(&app, get("/api/v1/queue")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn signed_request_gets_operator_rights() {
    let app = build_router(test_context(42).await);

    let body = signed(
        json!({"title": "Signed", "artist": "Op", "durationSeconds": 100}),
        42,
    );
    let (status, track) = send(&app, post("/api/v1/admin/tracks", body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(track["title"], "Signed");
}

#[tokio::test]
async fn bad_signature_gets_401() {
    let app = build_router(test_context(42).await);

    let body = signed(
        json!({"title": "Signed", "artist": "Op", "durationSeconds": 100}),
        7,
    );
    let (status, _) = send(&app, post("/api/v1/admin/tracks", body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn replay_returns_missed_envelopes() {
    let app = build_router(test_context(0).await);
    let a = add_track(&app, "A").await;
    send(&app, post("/api/v1/admin/queue", json!({"trackId": a}))).await;

    let (status, replay) = send(&app, get("/api/v1/events/replay?since=0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["complete"], true);

    let envelopes = replay["envelopes"].as_array().unwrap();
    assert!(!envelopes.is_empty());
    let last = replay["lastSequence"].as_u64().unwrap();
    assert_eq!(envelopes.last().unwrap()["sequenceNumber"].as_u64(), Some(last));

    let (_, partial) = send(
        &app,
        get(&format!("/api/v1/events/replay?since={}", last - 1)),
    )
    .await;
    assert_eq!(partial["envelopes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn event_stream_resyncs_unknown_cursor_and_keeps_streaming() {
    let ctx = test_context(0).await;
    let app = build_router(ctx);

    // A cursor this process never issued, e.g. from before a restart
    let request = Request::builder()
        .uri("/api/v1/events")
        .header("last-event-id", "500")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();

    let a = add_track(&app, "A").await;
    send(&app, post("/api/v1/admin/queue", json!({"trackId": a}))).await;

    let mut text = String::new();
    while !text.contains("\"type\":\"playback\"") {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("event stream stalled")
            .unwrap()
            .unwrap();
        if let Ok(data) = frame.into_data() {
            text.push_str(&String::from_utf8_lossy(&data));
        }
    }

    let resync = text.find("resync").unwrap();
    let queue = text.find("\"type\":\"queue\"").unwrap();
    assert!(resync < queue);
    assert!(text.contains("\"lastSequence\":0"));
}
