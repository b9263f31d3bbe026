//! Database row models
//!
//! Plain records mirroring the table layout, decoded with
//! `sqlx::query_as`. Ids are stored as TEXT guids, timestamps as RFC 3339
//! TEXT. Conversion into domain types happens in the service crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackRow {
    pub guid: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VotingRoundRow {
    pub guid: String,
    /// JSON array of track guids
    pub candidate_track_ids: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoundVoteRow {
    pub round_guid: String,
    pub voter_id: String,
    pub track_guid: String,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntryRow {
    pub guid: String,
    pub track_guid: String,
    pub status: String,
    pub votes: i64,
    pub vote_count_at_promotion: Option<i64>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
