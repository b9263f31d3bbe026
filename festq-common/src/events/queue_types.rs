//! Queue snapshot types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntryStatus;

/// Queue entry as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryInfo {
    pub entry_id: Uuid,
    pub track_id: Uuid,
    pub status: EntryStatus,
    pub votes: u32,
    pub vote_count_at_promotion: Option<u32>,
    pub added_at: DateTime<Utc>,
}

/// One row of the ranked queue order
///
/// `entry_id` is `None` for open-round candidates that do not have a queue
/// entry yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTrack {
    pub position: usize,
    pub track_id: Uuid,
    pub entry_id: Option<Uuid>,
    pub votes: u32,
    pub added_at: DateTime<Utc>,
}

/// Queue-order snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub playing: Option<QueueEntryInfo>,
    pub next: Option<QueueEntryInfo>,
    pub order: Vec<RankedTrack>,
}

impl QueueSnapshot {
    pub fn ordered_track_ids(&self) -> Vec<Uuid> {
        self.order.iter().map(|r| r.track_id).collect()
    }
}
