//! Server-Sent Events stream of broadcast envelopes
//!
//! Each SSE event carries the envelope's sequence number as its `id` and the
//! event type as its `event` name. A reconnecting client that sends
//! `Last-Event-ID` first receives the retained envelopes it missed. When
//! those are no longer retained, or the id was issued before a restart, the
//! stream opens with a `resync` event instead and the client refetches the
//! current snapshots.

use crate::api::server::AppContext;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use festq_common::events::{Envelope, Replay};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    #[serde(default)]
    since: u64,
}

/// GET /api/v1/events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let gateway = ctx.service.gateway();

    // Subscribe before reading the backlog so nothing falls in between
    let rx = gateway.subscribe();

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let mut resync = None;
    let (backlog, delivered_up_to) = match last_event_id {
        Some(since) => {
            let replay = gateway.replay_since(since);
            if !replay.complete {
                warn!(
                    "SSE client resumed from {} but only {} is replayable; sending resync",
                    since, replay.last_sequence
                );
                resync = Some(replay.last_sequence);
            }
            // An id from a previous run says nothing about this run's envelopes
            let floor = if since > replay.last_sequence { 0 } else { since };
            let up_to = replay
                .envelopes
                .last()
                .map_or(floor, |e| e.sequence_number);
            (replay.envelopes, up_to)
        }
        None => (Vec::new(), 0),
    };

    debug!(
        "New SSE client connected (resume from {:?}, {} replayed)",
        last_event_id,
        backlog.len()
    );

    let resync = stream::iter(resync).map(|last_sequence| Ok(resync_event(last_sequence)));
    let replayed = stream::iter(backlog).map(|envelope| Ok(to_event(&envelope)));

    let live = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            // Already sent from the backlog
            Ok(envelope) if envelope.sequence_number <= delivered_up_to => None,
            Ok(envelope) => Some(Ok(to_event(&envelope))),
            Err(e) => {
                // Lagged: the client sees the gap in ids and can replay
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(resync.chain(replayed).chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(envelope: &Envelope) -> Event {
    let event = Event::default()
        .id(envelope.sequence_number.to_string())
        .event(envelope.event.kind());

    match serde_json::to_string(envelope) {
        Ok(json) => event.data(json),
        Err(e) => {
            warn!("Failed to serialize envelope {}: {}", envelope.sequence_number, e);
            event.comment("serialization error")
        }
    }
}

/// Tells the client its cursor cannot be served from retention
fn resync_event(last_sequence: u64) -> Event {
    Event::default()
        .event("resync")
        .data(serde_json::json!({ "lastSequence": last_sequence }).to_string())
}

/// GET /api/v1/events/replay?since=N
pub async fn replay(
    State(ctx): State<AppContext>,
    Query(query): Query<ReplayQuery>,
) -> Json<Replay> {
    Json(ctx.service.gateway().replay_since(query.since))
}
