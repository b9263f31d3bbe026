//! Playback session state machine
//!
//! `Empty` → `Playing` → (finish | skip) → `Advancing` → `Playing` | `Empty`.
//!
//! The session owns the queue. It is a plain value; the service keeps it
//! behind one lock so advances are serialized, which is what makes a
//! second skip racing the first one observe the advanced state.

use chrono::{DateTime, Utc};
use festq_common::events::{NowPlaying, PlaybackSnapshot, PlaybackState, TallySnapshot};
use festq_common::time;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::TrackCatalog;
use crate::queue::{Advance, QueueEntry, QueueManager};

/// What caused an advance, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Finished,
    Skip,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Start => write!(f, "start"),
            Trigger::Finished => write!(f, "finished"),
            Trigger::Skip => write!(f, "skip"),
        }
    }
}

/// The single playback session
#[derive(Debug)]
pub struct PlaybackSession {
    state: PlaybackState,
    queue: QueueManager,
    advance_count: u64,
}

impl PlaybackSession {
    pub fn new(queue: QueueManager) -> Self {
        let state = if queue.current().is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Empty
        };
        Self {
            state,
            queue,
            advance_count: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut QueueManager {
        &mut self.queue
    }

    pub fn advance_count(&self) -> u64 {
        self.advance_count
    }

    pub fn current_entry_id(&self) -> Option<Uuid> {
        self.queue.current().map(|e| e.id)
    }

    /// Start playing if idle and something is waiting
    ///
    /// `live` is the open round's tally, if any; promotion ranks on it the
    /// same way the published queue order does.
    pub fn start_if_idle(
        &mut self,
        now: DateTime<Utc>,
        live: Option<&TallySnapshot>,
    ) -> Option<Advance> {
        if self.state != PlaybackState::Empty {
            return None;
        }
        if self.queue.next().is_none() && !self.queue.has_queued() {
            return None;
        }
        Some(self.advance(Trigger::Start, now, live))
    }

    /// Natural completion of `entry_id`
    ///
    /// Stale completions (for an entry that is no longer playing) are no-ops.
    pub fn track_finished(
        &mut self,
        entry_id: Uuid,
        now: DateTime<Utc>,
        live: Option<&TallySnapshot>,
    ) -> Option<Advance> {
        if self.current_entry_id() != Some(entry_id) {
            debug!("Ignoring finish for entry {} (not playing)", entry_id);
            return None;
        }
        Some(self.advance(Trigger::Finished, now, live))
    }

    /// Operator skip
    ///
    /// `expected` is the entry the caller saw playing. If another advance got
    /// there first the skip is a no-op.
    pub fn skip(
        &mut self,
        expected: Option<Uuid>,
        now: DateTime<Utc>,
        live: Option<&TallySnapshot>,
    ) -> Option<Advance> {
        let current = self.current_entry_id()?;
        if expected.is_some_and(|id| id != current) {
            debug!(
                "Skip for entry {:?} ignored, entry {} is playing",
                expected, current
            );
            return None;
        }
        Some(self.advance(Trigger::Skip, now, live))
    }

    /// Fill an empty `next` slot while playing
    pub fn refill_next(&mut self, live: Option<&TallySnapshot>) -> Option<QueueEntry> {
        if self.state != PlaybackState::Playing || self.queue.next().is_some() {
            return None;
        }
        self.queue.promote_top(live).ok()
    }

    /// Entry id of the current track once its duration has run out
    pub fn due_to_finish(&self, catalog: &TrackCatalog, now: DateTime<Utc>) -> Option<Uuid> {
        let current = self.queue.current()?;
        let started_at = current.started_at?;
        let duration = catalog
            .get(current.track_id)
            .map(|t| t.duration_seconds)
            .unwrap_or(0);
        (now >= time::deadline(started_at, duration)).then_some(current.id)
    }

    fn advance(
        &mut self,
        trigger: Trigger,
        now: DateTime<Utc>,
        live: Option<&TallySnapshot>,
    ) -> Advance {
        self.state = PlaybackState::Advancing;
        let advance = self.queue.advance(now, live);
        self.advance_count += 1;

        self.state = if self.queue.current().is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Empty
        };

        info!(
            "Advance #{} ({}): finished={:?} started={:?} next={:?} -> {}",
            self.advance_count,
            trigger,
            advance.finished.as_ref().map(|e| e.track_id),
            advance.started.as_ref().map(|e| e.track_id),
            self.queue.next().map(|e| e.track_id),
            self.state
        );
        advance
    }

    /// Snapshot for clients; titles come from the catalog
    pub fn snapshot(&self, catalog: &TrackCatalog) -> PlaybackSnapshot {
        let now_playing = self.queue.current().map(|entry| {
            let track = catalog.get(entry.track_id);
            NowPlaying {
                entry_id: entry.id,
                track_id: entry.track_id,
                title: track.as_ref().map(|t| t.title.clone()).unwrap_or_default(),
                artist: track.as_ref().map(|t| t.artist.clone()).unwrap_or_default(),
                started_at: entry.started_at.unwrap_or(entry.added_at),
                duration_seconds: track.map(|t| t.duration_seconds).unwrap_or(0),
            }
        });

        PlaybackSnapshot {
            state: self.state,
            now_playing,
            next_entry_id: self.queue.next().map(|e| e.id),
            advance_count: self.advance_count,
        }
    }
}
