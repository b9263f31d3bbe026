//! Voting round tally types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a round still accepts votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Open,
    Closed,
}

/// Vote count for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub track_id: Uuid,
    pub votes: u32,
    /// Share of all votes in the round, 0.0 - 100.0
    pub percentage: f64,
}

/// Tally snapshot of one voting round
///
/// Candidates appear in the order fixed at round creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySnapshot {
    pub round_id: Uuid,
    pub status: RoundStatus,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub remaining_seconds: u64,
    pub total_votes: u32,
    pub candidates: Vec<CandidateTally>,
}

impl TallySnapshot {
    /// Votes for a track, or `None` if it is not a candidate
    pub fn votes_for(&self, track_id: Uuid) -> Option<u32> {
        self.candidates
            .iter()
            .find(|c| c.track_id == track_id)
            .map(|c| c.votes)
    }

    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Open
    }
}
