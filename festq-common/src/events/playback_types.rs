//! Playback-related type definitions
//!
//! Supporting types for the playback state machine and queue entry lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playback session state
///
/// `Advancing` is transient: it is only ever held while the session is
/// moving `playing` → `played` and `next` → `playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No current track
    Empty,
    /// Exactly one entry is `playing`
    Playing,
    /// Transition in progress
    Advancing,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Empty => write!(f, "empty"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Advancing => write!(f, "advancing"),
        }
    }
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Queued,
    Next,
    Playing,
    Played,
}

impl EntryStatus {
    /// Stable text form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Next => "next",
            EntryStatus::Playing => "playing",
            EntryStatus::Played => "played",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(EntryStatus::Queued),
            "next" => Ok(EntryStatus::Next),
            "playing" => Ok(EntryStatus::Playing),
            "played" => Ok(EntryStatus::Played),
            other => Err(format!("unknown entry status: {}", other)),
        }
    }
}

/// The entry currently on air
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub entry_id: Uuid,
    pub track_id: Uuid,
    pub title: String,
    pub artist: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u32,
}

/// Playback-state snapshot broadcast after every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub now_playing: Option<NowPlaying>,
    pub next_entry_id: Option<Uuid>,
    /// Number of completed advances in this session
    pub advance_count: u64,
}

impl PlaybackSnapshot {
    pub fn empty() -> Self {
        Self {
            state: PlaybackState::Empty,
            now_playing: None,
            next_entry_id: None,
            advance_count: 0,
        }
    }

    /// Entry id of the current track, if any
    pub fn now_playing_entry_id(&self) -> Option<Uuid> {
        self.now_playing.as_ref().map(|n| n.entry_id)
    }
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
