//! Voting rounds
//!
//! The registry owns every in-memory round. Each round sits behind its own
//! lock so votes for one round never wait on another; a separate open-slot
//! lock serializes round lifecycle changes (open, close) so at most one round
//! is open at a time.
//!
//! Lock order, outermost first: open slot, playback session, round.

mod round;

pub use round::{RoundRecord, StoredRound, VotingRound};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use festq_common::events::TallySnapshot;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use uuid::Uuid;

/// Shared handle to one round
pub type RoundHandle = Arc<Mutex<VotingRound>>;

/// In-memory rounds: the current one and its predecessor
pub struct VotingRegistry {
    rounds: DashMap<Uuid, RoundHandle>,
    /// Id of the round that is open, if any
    open_slot: Mutex<Option<Uuid>>,
    /// Most recently opened round, open or closed
    latest: watch::Sender<Option<Uuid>>,
}

impl VotingRegistry {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            rounds: DashMap::new(),
            open_slot: Mutex::new(None),
            latest,
        }
    }

    /// Registry seeded with a restored round
    ///
    /// The round occupies the open slot unless it was already closed.
    pub fn with_latest(round: VotingRound) -> Self {
        let open = (!round.is_closed()).then(|| round.id());
        let registry = Self::new();
        registry.insert(round);
        Self {
            open_slot: Mutex::new(open),
            ..registry
        }
    }

    /// Lock the open slot; held for the whole of an open or close
    pub async fn lock_open_slot(&self) -> MutexGuard<'_, Option<Uuid>> {
        self.open_slot.lock().await
    }

    pub fn get(&self, round_id: Uuid) -> Option<RoundHandle> {
        self.rounds.get(&round_id).map(|r| Arc::clone(r.value()))
    }

    /// Id of the most recently opened round
    pub fn latest_id(&self) -> Option<Uuid> {
        *self.latest.borrow()
    }

    pub fn latest(&self) -> Option<RoundHandle> {
        self.latest_id().and_then(|id| self.get(id))
    }

    /// Register a new round as the latest
    ///
    /// Rounds older than the previous one are dropped from memory; their
    /// tallies remain in storage.
    pub fn insert(&self, round: VotingRound) -> RoundHandle {
        let id = round.id();
        let previous = self.latest_id();
        let handle = Arc::new(Mutex::new(round));
        self.rounds.insert(id, Arc::clone(&handle));
        self.rounds
            .retain(|key, _| *key == id || Some(*key) == previous);
        self.latest.send_replace(Some(id));
        handle
    }

    /// Tally of the latest round if it is still open
    ///
    /// Takes the round lock; callers must not already hold it.
    pub async fn live_tally(&self, now: DateTime<Utc>) -> Option<TallySnapshot> {
        let handle = self.latest()?;
        let round = handle.lock().await;
        if round.is_closed() {
            None
        } else {
            Some(round.snapshot(now))
        }
    }

    /// Tally of the latest round, open or closed
    pub async fn latest_tally(&self, now: DateTime<Utc>) -> Option<TallySnapshot> {
        let handle = self.latest()?;
        let round = handle.lock().await;
        Some(round.snapshot(now))
    }

    /// Whether any in-memory open round lists `track_id` as a candidate
    pub async fn open_round_references(&self, track_id: Uuid) -> bool {
        let Some(handle) = self.latest() else {
            return false;
        };
        let round = handle.lock().await;
        !round.is_closed() && round.is_candidate(track_id)
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

impl Default for VotingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
