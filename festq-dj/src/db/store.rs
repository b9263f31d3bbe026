//! Repository interface and its SQLite implementation
//!
//! Every write is an idempotent upsert or insert-or-ignore, so a retried
//! write never double-counts. Ids are stored as TEXT guids. Reads decode
//! into the row models from `festq_common::db` and convert from there.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use festq_common::db::{QueueEntryRow, RoundVoteRow, Setting, TrackRow, VotingRoundRow};
use festq_common::events::EntryStatus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::catalog::Track;
use crate::error::{Error, Result};
use crate::queue::QueueEntry;
use crate::voting::{RoundRecord, StoredRound};

/// Settings key holding the event sequence high-water mark
const SEQUENCE_FLOOR_KEY: &str = "event_sequence_floor";

/// Persistence operations the service needs
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_tracks(&self) -> Result<Vec<Track>>;

    async fn save_track(&self, track: &Track) -> Result<()>;

    async fn delete_track(&self, track_id: Uuid) -> Result<()>;

    /// Insert or update a round header (candidates, timing, close time)
    async fn save_round(&self, round: &RoundRecord) -> Result<()>;

    /// Record one accepted vote; recording the same voter twice is a no-op
    async fn record_vote(
        &self,
        round_id: Uuid,
        voter_id: &str,
        track_id: Uuid,
        cast_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Most recently started round together with its ledger
    async fn load_latest_round(&self) -> Result<Option<StoredRound>>;

    /// One round by id together with its ledger
    async fn load_round(&self, round_id: Uuid) -> Result<Option<StoredRound>>;

    async fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()>;

    /// All entries that have not been played yet
    async fn load_queue_entries(&self) -> Result<Vec<QueueEntry>>;

    /// Latest finish time per played track
    async fn load_last_played(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>>;

    /// Event sequence numbers at or below this value may have been handed
    /// out by an earlier run (0 if none were)
    async fn load_sequence_floor(&self) -> Result<u64>;

    /// Raise the stored floor; a lower value than the stored one is ignored
    async fn save_sequence_floor(&self, floor: u64) -> Result<()>;
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Corrupt(format!("invalid {} '{}': {}", what, value, e)))
}

fn to_u32(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Corrupt(format!("{} out of range: {}", what, value)))
}

impl TryFrom<TrackRow> for Track {
    type Error = Error;

    fn try_from(row: TrackRow) -> Result<Self> {
        Ok(Track {
            id: parse_uuid(&row.guid, "track guid")?,
            title: row.title,
            artist: row.artist,
            duration_seconds: to_u32(row.duration_seconds, "duration_seconds")?,
        })
    }
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = Error;

    fn try_from(row: QueueEntryRow) -> Result<Self> {
        Ok(QueueEntry {
            id: parse_uuid(&row.guid, "entry guid")?,
            track_id: parse_uuid(&row.track_guid, "entry track guid")?,
            status: EntryStatus::from_str(&row.status).map_err(Error::Corrupt)?,
            votes: to_u32(row.votes, "votes")?,
            vote_count_at_promotion: row
                .vote_count_at_promotion
                .map(|v| to_u32(v, "vote_count_at_promotion"))
                .transpose()?,
            added_at: row.added_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Combine a round header with its vote rows
fn stored_round(row: VotingRoundRow, votes: Vec<RoundVoteRow>) -> Result<StoredRound> {
    let id = parse_uuid(&row.guid, "round guid")?;
    let candidates: Vec<Uuid> = serde_json::from_str(&row.candidate_track_ids)
        .map_err(|e| Error::Corrupt(format!("round {} candidates: {}", id, e)))?;

    let votes = votes
        .into_iter()
        .map(|v| Ok((v.voter_id, parse_uuid(&v.track_guid, "vote track guid")?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(StoredRound {
        id,
        candidates,
        started_at: row.started_at,
        duration_seconds: to_u32(row.duration_seconds, "duration_seconds")?,
        closed_at: row.closed_at,
        votes,
    })
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn with_votes(&self, row: VotingRoundRow) -> Result<StoredRound> {
        let votes = sqlx::query_as::<_, RoundVoteRow>(
            r#"
            SELECT round_guid, voter_id, track_guid, cast_at
            FROM round_votes
            WHERE round_guid = ?
            ORDER BY cast_at, rowid
            "#,
        )
        .bind(&row.guid)
        .fetch_all(&self.pool)
        .await?;

        stored_round(row, votes)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_tracks(&self) -> Result<Vec<Track>> {
        let rows = sqlx::query_as::<_, TrackRow>(
            "SELECT guid, title, artist, duration_seconds, created_at FROM tracks",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Track::try_from).collect()
    }

    async fn save_track(&self, track: &Track) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO tracks (guid, title, artist, duration_seconds, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(track.id.to_string())
        .bind(&track.title)
        .bind(&track.artist)
        .bind(i64::from(track.duration_seconds))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_track(&self, track_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM tracks WHERE guid = ?")
            .bind(track_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_round(&self, round: &RoundRecord) -> Result<()> {
        let candidates = serde_json::to_string(&round.candidates)
            .map_err(|e| Error::Corrupt(format!("candidate list: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO voting_rounds (guid, candidate_track_ids, started_at, duration_seconds, closed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guid) DO UPDATE SET closed_at = excluded.closed_at
            "#,
        )
        .bind(round.id.to_string())
        .bind(candidates)
        .bind(round.started_at)
        .bind(i64::from(round.duration_seconds))
        .bind(round.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_vote(
        &self,
        round_id: Uuid,
        voter_id: &str,
        track_id: Uuid,
        cast_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO round_votes (round_guid, voter_id, track_guid, cast_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(round_id.to_string())
        .bind(voter_id)
        .bind(track_id.to_string())
        .bind(cast_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_latest_round(&self) -> Result<Option<StoredRound>> {
        let row = sqlx::query_as::<_, VotingRoundRow>(
            r#"
            SELECT guid, candidate_track_ids, started_at, duration_seconds, closed_at
            FROM voting_rounds
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.with_votes(row).await?)),
            None => Ok(None),
        }
    }

    async fn load_round(&self, round_id: Uuid) -> Result<Option<StoredRound>> {
        let row = sqlx::query_as::<_, VotingRoundRow>(
            r#"
            SELECT guid, candidate_track_ids, started_at, duration_seconds, closed_at
            FROM voting_rounds
            WHERE guid = ?
            "#,
        )
        .bind(round_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.with_votes(row).await?)),
            None => Ok(None),
        }
    }

    async fn save_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_entries
                (guid, track_guid, status, votes, vote_count_at_promotion, added_at, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guid) DO UPDATE SET
                status = excluded.status,
                votes = excluded.votes,
                vote_count_at_promotion = excluded.vote_count_at_promotion,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.track_id.to_string())
        .bind(entry.status.as_str())
        .bind(i64::from(entry.votes))
        .bind(entry.vote_count_at_promotion.map(i64::from))
        .bind(entry.added_at)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_queue_entries(&self) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(
            r#"
            SELECT guid, track_guid, status, votes, vote_count_at_promotion, added_at, started_at, finished_at
            FROM queue_entries
            WHERE status != 'played'
            ORDER BY added_at, rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn load_last_played(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            r#"
            SELECT track_guid, finished_at
            FROM queue_entries
            WHERE status = 'played' AND finished_at IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for (track_guid, finished_at) in rows {
            let track_id = parse_uuid(&track_guid, "entry track guid")?;
            latest
                .entry(track_id)
                .and_modify(|t| *t = (*t).max(finished_at))
                .or_insert(finished_at);
        }
        Ok(latest.into_iter().collect())
    }

    async fn load_sequence_floor(&self) -> Result<u64> {
        let setting = sqlx::query_as::<_, Setting>("SELECT key, value FROM settings WHERE key = ?")
            .bind(SEQUENCE_FLOOR_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match setting {
            Some(setting) => setting.value.parse().map_err(|_| {
                Error::Corrupt(format!("{} is not a number: '{}'", setting.key, setting.value))
            }),
            None => Ok(0),
        }
    }

    async fn save_sequence_floor(&self, floor: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            WHERE CAST(settings.value AS INTEGER) < CAST(excluded.value AS INTEGER)
            "#,
        )
        .bind(SEQUENCE_FLOOR_KEY)
        .bind(floor.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
