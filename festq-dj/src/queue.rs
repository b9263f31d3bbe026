//! Queue Manager
//!
//! Tracks which entries are where in the play sequence:
//! - Current: playing now
//! - Next: promoted, plays after current
//! - Queued: ranked candidates waiting for promotion
//!
//! Played entries leave the manager; only the last play time per track is
//! kept, for round candidate selection.

use chrono::{DateTime, Utc};
use festq_common::events::{EntryStatus, QueueEntryInfo, QueueSnapshot, RankedTrack, TallySnapshot};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::TrackCatalog;
use crate::error::{Error, Result};
use crate::ranking::{self, RankCandidate};

/// A track placed into the play sequence
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: Uuid,
    pub track_id: Uuid,
    pub status: EntryStatus,
    /// Accumulated crowd votes from closed rounds
    pub votes: u32,
    /// Votes at the moment the entry became `next`
    pub vote_count_at_promotion: Option<u32>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(track_id: Uuid, votes: u32, added_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            status: EntryStatus::Queued,
            votes,
            vote_count_at_promotion: None,
            added_at,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn info(&self) -> QueueEntryInfo {
        QueueEntryInfo {
            entry_id: self.id,
            track_id: self.track_id,
            status: self.status,
            votes: self.votes,
            vote_count_at_promotion: self.vote_count_at_promotion,
            added_at: self.added_at,
        }
    }

    fn rank_candidate(&self) -> RankCandidate {
        RankCandidate {
            track_id: self.track_id,
            entry_id: Some(self.id),
            votes: self.votes,
            added_at: self.added_at,
        }
    }
}

/// Entries touched by one advance
#[derive(Debug, Clone, Default)]
pub struct Advance {
    /// Entry that moved `playing` → `played`
    pub finished: Option<QueueEntry>,
    /// Entry that moved `next` → `playing`
    pub started: Option<QueueEntry>,
    /// Entry that moved `queued` → `next` to refill the slot
    pub promoted: Option<QueueEntry>,
}

impl Advance {
    /// Every entry whose stored status changed
    pub fn changed_entries(&self) -> Vec<QueueEntry> {
        [&self.finished, &self.started, &self.promoted]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Queue position tracking
#[derive(Debug, Default)]
pub struct QueueManager {
    current: Option<QueueEntry>,
    next: Option<QueueEntry>,
    queued: Vec<QueueEntry>,
    last_played: HashMap<Uuid, DateTime<Utc>>,
}

impl QueueManager {
    /// Create new empty queue manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted non-played entries
    ///
    /// Extra `playing` or `next` entries (left by an interrupted write) are
    /// demoted to `queued` so the single-current, single-next rule holds.
    pub fn restore(entries: Vec<QueueEntry>, last_played: Vec<(Uuid, DateTime<Utc>)>) -> Self {
        let mut manager = Self::new();
        manager.last_played = last_played.into_iter().collect();

        let mut entries = entries;
        entries.sort_by_key(|e| (e.started_at, e.added_at));

        for mut entry in entries {
            match entry.status {
                EntryStatus::Playing if manager.current.is_none() => manager.current = Some(entry),
                EntryStatus::Next if manager.next.is_none() => manager.next = Some(entry),
                EntryStatus::Played => {}
                status => {
                    if status != EntryStatus::Queued {
                        warn!(
                            "Demoting extra {} entry {} to queued during restore",
                            status, entry.id
                        );
                        entry.status = EntryStatus::Queued;
                        entry.started_at = None;
                        entry.vote_count_at_promotion = None;
                    }
                    manager.queued.push(entry);
                }
            }
        }

        manager
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.as_ref()
    }

    pub fn next(&self) -> Option<&QueueEntry> {
        self.next.as_ref()
    }

    pub fn queued(&self) -> &[QueueEntry] {
        &self.queued
    }

    /// Whether any queued entry exists
    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Number of non-played entries
    pub fn len(&self) -> usize {
        self.queued.len() + usize::from(self.current.is_some()) + usize::from(self.next.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-played entries: current, next, then queued
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.current
            .iter()
            .chain(self.next.iter())
            .chain(self.queued.iter())
    }

    /// Whether a non-played entry refers to `track_id`
    pub fn references_track(&self, track_id: Uuid) -> bool {
        self.entries().any(|e| e.track_id == track_id)
    }

    pub fn last_played(&self, track_id: Uuid) -> Option<DateTime<Utc>> {
        self.last_played.get(&track_id).copied()
    }

    /// Place a track into the queue with zero votes
    ///
    /// A track that already has a non-played entry is not duplicated; the
    /// existing entry is returned with `false`.
    pub fn enqueue(&mut self, track_id: Uuid, now: DateTime<Utc>) -> (QueueEntry, bool) {
        if let Some(existing) = self.entries().find(|e| e.track_id == track_id) {
            return (existing.clone(), false);
        }

        let entry = QueueEntry::new(track_id, 0, now);
        self.queued.push(entry.clone());
        (entry, true)
    }

    /// Apply a closed round's tally to the queue
    ///
    /// Candidates with votes grow an existing queued entry or become a new
    /// one added at `now`. Zero-vote candidates, tracks already current or
    /// next, and tracks no longer in the catalog are skipped. Returns the
    /// entries that changed.
    pub fn apply_round_result(
        &mut self,
        tally: &TallySnapshot,
        catalog: &TrackCatalog,
        now: DateTime<Utc>,
    ) -> Vec<QueueEntry> {
        let mut changed = Vec::new();

        for candidate in tally.candidates.iter().filter(|c| c.votes > 0) {
            let track_id = candidate.track_id;

            if self.current.as_ref().is_some_and(|e| e.track_id == track_id)
                || self.next.as_ref().is_some_and(|e| e.track_id == track_id)
            {
                debug!("Round {}: track {} already playing or next", tally.round_id, track_id);
                continue;
            }

            if let Some(entry) = self.queued.iter_mut().find(|e| e.track_id == track_id) {
                entry.votes = entry.votes.saturating_add(candidate.votes);
                changed.push(entry.clone());
                continue;
            }

            if !catalog.contains(track_id) {
                warn!("Round {}: track {} left the catalog, not queued", tally.round_id, track_id);
                continue;
            }

            let entry = QueueEntry::new(track_id, candidate.votes, now);
            self.queued.push(entry.clone());
            changed.push(entry);
        }

        changed
    }

    /// Ranked order of queued entries
    ///
    /// With an open round, each candidate's live votes are added to its
    /// queued entry, and candidates without an entry appear as provisional
    /// rows added at the round's start.
    pub fn recompute_order(&self, live: Option<&TallySnapshot>) -> Vec<RankedTrack> {
        self.effective_rows(live)
            .into_iter()
            .enumerate()
            .map(|(i, row)| RankedTrack {
                position: i + 1,
                track_id: row.track_id,
                entry_id: row.entry_id,
                votes: row.votes,
                added_at: row.added_at,
            })
            .collect()
    }

    /// Queued entries plus live round votes, ranked
    fn effective_rows(&self, live: Option<&TallySnapshot>) -> Vec<RankCandidate> {
        let mut rows: Vec<RankCandidate> = self.queued.iter().map(QueueEntry::rank_candidate).collect();

        if let Some(live) = live.filter(|t| t.is_open()) {
            for candidate in &live.candidates {
                if let Some(row) = rows.iter_mut().find(|r| r.track_id == candidate.track_id) {
                    row.votes = row.votes.saturating_add(candidate.votes);
                } else if !self.is_current_or_next(candidate.track_id) {
                    rows.push(RankCandidate {
                        track_id: candidate.track_id,
                        entry_id: None,
                        votes: candidate.votes,
                        added_at: live.started_at,
                    });
                }
            }
        }

        ranking::rank(rows)
    }

    fn is_current_or_next(&self, track_id: Uuid) -> bool {
        self.current.iter().chain(self.next.iter()).any(|e| e.track_id == track_id)
    }

    /// Move the top-ranked queued entry into `next`
    ///
    /// Ranks the same rows `recompute_order` shows, so an open round's live
    /// votes count. Provisional rows have no entry yet and are passed over.
    /// If `next` is already occupied it is returned unchanged.
    pub fn promote_top(&mut self, live: Option<&TallySnapshot>) -> Result<QueueEntry> {
        if let Some(next) = &self.next {
            return Ok(next.clone());
        }

        let (top_id, effective_votes) = self
            .effective_rows(live)
            .into_iter()
            .find_map(|row| row.entry_id.map(|id| (id, row.votes)))
            .ok_or(Error::QueueEmpty)?;

        let index = self
            .queued
            .iter()
            .position(|e| e.id == top_id)
            .ok_or(Error::EntryNotFound(top_id))?;

        let mut entry = self.queued.remove(index);
        entry.status = EntryStatus::Next;
        entry.vote_count_at_promotion = Some(effective_votes);
        self.next = Some(entry.clone());

        debug!(
            "Promoted entry {} (track {}) to next with {} votes",
            entry.id, entry.track_id, effective_votes
        );
        Ok(entry)
    }

    /// Finish the current entry and start the next one
    ///
    /// `next` is filled from the queue first if it is empty, then refilled
    /// after it starts. With nothing left the manager ends with no current
    /// entry.
    pub fn advance(&mut self, now: DateTime<Utc>, live: Option<&TallySnapshot>) -> Advance {
        let mut advance = Advance::default();

        if let Some(mut finished) = self.current.take() {
            finished.status = EntryStatus::Played;
            finished.finished_at = Some(now);
            self.last_played.insert(finished.track_id, now);
            advance.finished = Some(finished);
        }

        if self.next.is_none() {
            // QueueEmpty here just means there is nothing to start
            let _ = self.promote_top(live);
        }

        if let Some(mut started) = self.next.take() {
            started.status = EntryStatus::Playing;
            started.started_at = Some(now);
            self.current = Some(started.clone());
            advance.started = Some(started);
        }

        advance.promoted = self.promote_top(live).ok();
        advance
    }

    /// Queue-order snapshot
    pub fn snapshot(&self, live: Option<&TallySnapshot>) -> QueueSnapshot {
        QueueSnapshot {
            playing: self.current.as_ref().map(QueueEntry::info),
            next: self.next.as_ref().map(QueueEntry::info),
            order: self.recompute_order(live),
        }
    }
}
