//! A single voting round
//!
//! Plain data with explicit `now` arguments. Serialization of concurrent
//! access is the registry's job; everything here runs under the round lock.

use chrono::{DateTime, Utc};
use festq_common::events::{CandidateTally, RoundStatus, TallySnapshot};
use festq_common::time;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Persisted form of a round, as loaded at startup
#[derive(Debug, Clone)]
pub struct StoredRound {
    pub id: Uuid,
    pub candidates: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub closed_at: Option<DateTime<Utc>>,
    /// (voter id, track id) in cast order
    pub votes: Vec<(String, Uuid)>,
}

/// Round header as written to storage
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    pub id: Uuid,
    pub candidates: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One time-boxed ballot over a fixed candidate set
#[derive(Debug, Clone)]
pub struct VotingRound {
    id: Uuid,
    candidates: Vec<Uuid>,
    tally: HashMap<Uuid, u32>,
    ledger: HashSet<String>,
    started_at: DateTime<Utc>,
    duration_seconds: u32,
    closed_at: Option<DateTime<Utc>>,
}

impl VotingRound {
    /// Open a new round
    ///
    /// Catalog membership of the candidates is checked by the caller; this
    /// only rejects empty and duplicated candidate sets.
    pub fn open(candidates: Vec<Uuid>, duration_seconds: u32, now: DateTime<Utc>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(Error::InvalidCandidateSet(
                "candidate set must not be empty".to_string(),
            ));
        }
        if duration_seconds == 0 {
            return Err(Error::BadRequest(
                "round duration must be at least one second".to_string(),
            ));
        }

        let mut tally = HashMap::with_capacity(candidates.len());
        for track_id in &candidates {
            if tally.insert(*track_id, 0).is_some() {
                return Err(Error::InvalidCandidateSet(format!(
                    "duplicate track {}",
                    track_id
                )));
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            candidates,
            tally,
            ledger: HashSet::new(),
            started_at: now,
            duration_seconds,
            closed_at: None,
        })
    }

    /// Rebuild a round from storage, replaying its ledger
    pub fn restore(stored: StoredRound) -> Result<Self> {
        let mut round = Self::open(stored.candidates, stored.duration_seconds.max(1), stored.started_at)
            .map_err(|e| Error::Corrupt(format!("round {}: {}", stored.id, e)))?;
        round.id = stored.id;
        round.duration_seconds = stored.duration_seconds;
        round.closed_at = stored.closed_at;

        for (voter_id, track_id) in stored.votes {
            let Some(count) = round.tally.get_mut(&track_id) else {
                return Err(Error::Corrupt(format!(
                    "round {}: vote for non-candidate {}",
                    stored.id, track_id
                )));
            };
            if round.ledger.insert(voter_id) {
                *count += 1;
            }
        }

        Ok(round)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&self) -> RoundRecord {
        RoundRecord {
            id: self.id,
            candidates: self.candidates.clone(),
            started_at: self.started_at,
            duration_seconds: self.duration_seconds,
            closed_at: self.closed_at,
        }
    }

    /// Candidates in creation order
    pub fn candidates(&self) -> &[Uuid] {
        &self.candidates
    }

    pub fn is_candidate(&self, track_id: Uuid) -> bool {
        self.tally.contains_key(&track_id)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        time::deadline(self.started_at, self.duration_seconds)
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Duration elapsed, whether or not the round was closed yet
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at()
    }

    /// Votes are counted only while `closed_at` is unset and the deadline
    /// has not passed
    pub fn accepts_votes(&self, now: DateTime<Utc>) -> bool {
        self.closed_at.is_none() && !self.is_expired(now)
    }

    pub fn votes_for(&self, track_id: Uuid) -> Option<u32> {
        self.tally.get(&track_id).copied()
    }

    pub fn total_votes(&self) -> u32 {
        self.tally.values().sum()
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.ledger.contains(voter_id)
    }

    /// Count one vote
    ///
    /// Checks run in a fixed order: closed, unknown candidate, duplicate.
    /// A rejected vote leaves tally and ledger untouched.
    pub fn cast_vote(&mut self, voter_id: &str, track_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if voter_id.trim().is_empty() {
            return Err(Error::BadRequest("voter id must not be empty".to_string()));
        }
        if !self.accepts_votes(now) {
            return Err(Error::RoundClosed(self.id));
        }

        let Some(count) = self.tally.get_mut(&track_id) else {
            return Err(Error::UnknownCandidate {
                round_id: self.id,
                track_id,
            });
        };

        if self.ledger.contains(voter_id) {
            return Err(Error::DuplicateVote {
                round_id: self.id,
                voter_id: voter_id.to_string(),
            });
        }

        self.ledger.insert(voter_id.to_string());
        *count += 1;
        Ok(())
    }

    /// Freeze the tally
    ///
    /// Returns true only for the call that actually closed the round. A
    /// round closed after its deadline records the deadline as `closed_at`.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if self.closed_at.is_some() {
            return false;
        }
        self.closed_at = Some(now.min(self.ends_at()));
        true
    }

    /// Tally snapshot with per-candidate percentages and countdown
    pub fn snapshot(&self, now: DateTime<Utc>) -> TallySnapshot {
        let total_votes = self.total_votes();
        let candidates = self
            .candidates
            .iter()
            .map(|track_id| {
                let votes = self.tally.get(track_id).copied().unwrap_or(0);
                let percentage = if total_votes == 0 {
                    0.0
                } else {
                    f64::from(votes) * 100.0 / f64::from(total_votes)
                };
                CandidateTally {
                    track_id: *track_id,
                    votes,
                    percentage,
                }
            })
            .collect();

        let ends_at = self.ends_at();
        let (status, remaining_seconds) = match self.closed_at {
            Some(_) => (RoundStatus::Closed, 0),
            None => (RoundStatus::Open, time::seconds_until(ends_at, now)),
        };

        TallySnapshot {
            round_id: self.id,
            status,
            started_at: self.started_at,
            ends_at,
            closed_at: self.closed_at,
            remaining_seconds,
            total_votes,
            candidates,
        }
    }
}
