//! HTTP request handlers
//!
//! Steady-state outcomes (`DuplicateVote`, `QueueEmpty`) answer `200 OK`
//! with `success: false` and a user-facing reason; everything else maps to
//! an error status.

use crate::api::server::AppContext;
use crate::catalog::Track;
use crate::error::Error;
use crate::service::Role;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use festq_common::events::{PlaybackSnapshot, QueueEntryInfo, QueueSnapshot, TallySnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    listeners: usize,
    last_sequence: u64,
}

#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTrackRequest {
    title: String,
    artist: String,
    duration_seconds: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRoundRequest {
    candidate_track_ids: Vec<Uuid>,
    duration_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    round_id: Uuid,
    voter_id: String,
    track_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    success: bool,
    tally: Option<TallySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    track_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    entry: Option<QueueEntryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRequest {
    queue_entry_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedRequest {
    queue_entry_id: Uuid,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Stable machine-readable code for an error
fn error_code(error: &Error) -> &'static str {
    match error {
        Error::InvalidCandidateSet(_) => "invalid_candidate_set",
        Error::RoundAlreadyOpen(_) => "round_already_open",
        Error::RoundClosed(_) => "round_closed",
        Error::UnknownCandidate { .. } => "unknown_candidate",
        Error::DuplicateVote { .. } => "duplicate_vote",
        Error::QueueEmpty => "queue_empty",
        Error::Unauthorized(_) => "unauthorized",
        Error::RoundNotFound(_) => "round_not_found",
        Error::TrackNotFound(_) => "track_not_found",
        Error::TrackInUse(_) => "track_in_use",
        Error::EntryNotFound(_) => "entry_not_found",
        Error::BadRequest(_) => "bad_request",
        Error::Database(_) | Error::Common(_) | Error::Corrupt(_) | Error::Http(_) => "internal",
    }
}

fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::DuplicateVote { .. } | Error::QueueEmpty => StatusCode::OK,
        Error::Unauthorized(_) => StatusCode::FORBIDDEN,
        Error::RoundNotFound(_) | Error::TrackNotFound(_) | Error::EntryNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::RoundAlreadyOpen(_) | Error::TrackInUse(_) | Error::RoundClosed(_) => {
            StatusCode::CONFLICT
        }
        Error::InvalidCandidateSet(_) | Error::UnknownCandidate { .. } | Error::BadRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Database(_) | Error::Common(_) | Error::Corrupt(_) | Error::Http(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = error_status(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": error_code(&self),
            "reason": self.user_message(),
        }));
        (status, body).into_response()
    }
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let gateway = ctx.service.gateway();
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "festq-dj".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        listeners: gateway.listener_count(),
        last_sequence: gateway.last_sequence(),
    })
}

// ============================================================================
// Catalog Endpoints
// ============================================================================

/// GET /api/v1/tracks?q=
pub async fn list_tracks(
    State(ctx): State<AppContext>,
    Query(query): Query<TrackQuery>,
) -> Json<Vec<Track>> {
    Json(ctx.service.search_tracks(query.q.as_deref().unwrap_or("")))
}

/// POST /api/v1/admin/tracks
pub async fn add_track(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Json(req): Json<AddTrackRequest>,
) -> Result<(StatusCode, Json<Track>), Error> {
    let track = ctx
        .service
        .add_track(role, &req.title, &req.artist, req.duration_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(track)))
}

/// DELETE /api/v1/admin/tracks/:track_id
pub async fn remove_track(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Path(track_id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    ctx.service.remove_track(role, track_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Voting Endpoints
// ============================================================================

/// GET /api/v1/rounds/current
pub async fn current_round(State(ctx): State<AppContext>) -> Response {
    match ctx.service.current_tally().await {
        Some(tally) => Json(tally).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "no_round", "reason": "no voting round yet"})),
        )
            .into_response(),
    }
}

/// POST /api/v1/votes
///
/// Rejected votes still answer with the current tally so the client can
/// redraw the ballot.
pub async fn cast_vote(State(ctx): State<AppContext>, Json(req): Json<VoteRequest>) -> Response {
    match ctx
        .service
        .cast_vote(req.round_id, &req.voter_id, req.track_id)
        .await
    {
        Ok(tally) => Json(VoteResponse {
            success: true,
            tally: Some(tally),
            reason: None,
        })
        .into_response(),
        Err(
            e @ (Error::DuplicateVote { .. }
            | Error::RoundClosed(_)
            | Error::UnknownCandidate { .. }),
        ) => {
            let status = error_status(&e);
            let tally = ctx
                .service
                .current_tally()
                .await
                .filter(|t| t.round_id == req.round_id);
            (
                status,
                Json(VoteResponse {
                    success: false,
                    tally,
                    reason: Some(e.user_message()),
                }),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /api/v1/admin/rounds
pub async fn open_round(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Json(req): Json<OpenRoundRequest>,
) -> Result<(StatusCode, Json<TallySnapshot>), Error> {
    let tally = ctx
        .service
        .open_round(role, req.candidate_track_ids, req.duration_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(tally)))
}

/// POST /api/v1/admin/rounds/:round_id/close
pub async fn close_round(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Path(round_id): Path<Uuid>,
) -> Result<Json<TallySnapshot>, Error> {
    Ok(Json(ctx.service.close_round(role, round_id).await?))
}

// ============================================================================
// Queue and Playback Endpoints
// ============================================================================

/// GET /api/v1/queue
pub async fn get_queue(State(ctx): State<AppContext>) -> Json<QueueSnapshot> {
    Json(ctx.service.queue_snapshot().await)
}

/// GET /api/v1/playback
pub async fn get_playback(State(ctx): State<AppContext>) -> Json<PlaybackSnapshot> {
    Json(ctx.service.playback_snapshot())
}

/// POST /api/v1/admin/queue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<EntryResponse>, Error> {
    let entry = ctx.service.enqueue(role, req.track_id).await?;
    Ok(Json(EntryResponse {
        success: true,
        entry: Some(entry),
        reason: None,
    }))
}

/// POST /api/v1/admin/queue/promote
pub async fn promote_top(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
) -> Result<Json<EntryResponse>, Error> {
    role.require_operator("promote")?;
    match ctx.service.promote_top().await {
        Ok(entry) => Ok(Json(EntryResponse {
            success: true,
            entry: Some(entry),
            reason: None,
        })),
        Err(e) if e.is_steady_state() => Ok(Json(EntryResponse {
            success: false,
            entry: None,
            reason: Some(e.user_message()),
        })),
        Err(e) => Err(e),
    }
}

/// POST /api/v1/admin/playback/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    body: Option<Json<SkipRequest>>,
) -> Result<Json<PlaybackSnapshot>, Error> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(ctx.service.skip(role, req.queue_entry_id).await?))
}

/// POST /api/v1/admin/playback/finished
pub async fn track_finished(
    State(ctx): State<AppContext>,
    Extension(role): Extension<Role>,
    Json(req): Json<FinishedRequest>,
) -> Result<Json<PlaybackSnapshot>, Error> {
    Ok(Json(
        ctx.service
            .track_finished(role, req.queue_entry_id)
            .await?,
    ))
}
