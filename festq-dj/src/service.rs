//! Queue service
//!
//! Coordinates the catalog, voting rounds, the playback session, the
//! broadcast gateway and storage. Every mutating operation returns
//! synchronously with its outcome; broadcasts and persistence are side
//! effects.
//!
//! Lock order, outermost first: open slot, playback session, round.
//! Storage writes for queue entries happen under the session lock so they
//! land in the same order as the transitions they record.

use chrono::{DateTime, Utc};
use festq_common::events::{PlaybackSnapshot, QueueEntryInfo, QueueSnapshot, TallySnapshot};
use festq_common::time;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{Track, TrackCatalog};
use crate::config::ServiceConfig;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::gateway::BroadcastGateway;
use crate::playback::PlaybackSession;
use crate::queue::{Advance, QueueEntry, QueueManager};
use crate::voting::{RoundHandle, VotingRegistry, VotingRound};

/// Event sequence numbers reserved in storage ahead of use
///
/// A restart resumes numbering at the stored reservation, so numbers never
/// repeat across runs even if the process dies without a clean shutdown.
const SEQUENCE_BLOCK: u64 = 10_000;

/// Authorization claim of the caller
///
/// Established by the transport; the service only checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Operator,
}

impl Role {
    pub fn require_operator(self, action: &'static str) -> Result<()> {
        match self {
            Role::Operator => Ok(()),
            Role::Listener => Err(Error::Unauthorized(action)),
        }
    }
}

/// What one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Round closed because its duration elapsed
    pub closed_round: Option<Uuid>,
    /// Round opened automatically
    pub opened_round: Option<Uuid>,
    /// Entry finished because its duration elapsed
    pub finished_entry: Option<Uuid>,
}

pub struct DjService {
    catalog: TrackCatalog,
    voting: VotingRegistry,
    session: Mutex<PlaybackSession>,
    playback: watch::Sender<PlaybackSnapshot>,
    gateway: BroadcastGateway,
    /// Highest sequence number covered by the stored floor
    sequence_reserved: AtomicU64,
    store: Arc<dyn Store>,
    config: ServiceConfig,
}

impl DjService {
    /// Service with empty state
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::assemble(
            TrackCatalog::new(),
            VotingRegistry::new(),
            QueueManager::new(),
            0,
            store,
            config,
        )
    }

    /// Service rebuilt from storage
    ///
    /// Loads the catalog, the latest round (tally and ledger) and every
    /// non-played queue entry. An entry stored as `playing` resumes as the
    /// current track. Event numbering resumes above the stored sequence
    /// floor.
    pub async fn restore(store: Arc<dyn Store>, config: ServiceConfig) -> Result<Self> {
        let catalog = TrackCatalog::from_tracks(store.load_tracks().await?);

        let voting = match store.load_latest_round().await? {
            Some(stored) => {
                let round = VotingRound::restore(stored)?;
                info!(
                    "Restored round {} ({} votes, {})",
                    round.id(),
                    round.total_votes(),
                    if round.is_closed() { "closed" } else { "open" }
                );
                VotingRegistry::with_latest(round)
            }
            None => VotingRegistry::new(),
        };

        let entries = store.load_queue_entries().await?;
        let last_played = store.load_last_played().await?;
        let queue = QueueManager::restore(entries, last_played);

        info!(
            "Restored {} tracks and {} queue entries",
            catalog.len(),
            queue.len()
        );

        let floor = store.load_sequence_floor().await?;
        store.save_sequence_floor(floor + SEQUENCE_BLOCK).await?;
        info!("Event sequence resumes after {}", floor);

        let service = Self::assemble(catalog, voting, queue, floor, store, config);
        service
            .sequence_reserved
            .store(floor + SEQUENCE_BLOCK, Ordering::Release);
        Ok(service)
    }

    fn assemble(
        catalog: TrackCatalog,
        voting: VotingRegistry,
        queue: QueueManager,
        sequence_floor: u64,
        store: Arc<dyn Store>,
        config: ServiceConfig,
    ) -> Self {
        let session = PlaybackSession::new(queue);
        let (playback, _) = watch::channel(session.snapshot(&catalog));
        let gateway = BroadcastGateway::with_last_sequence(
            config.broadcast_capacity,
            config.replay_depth,
            sequence_floor,
        );

        Self {
            catalog,
            voting,
            session: Mutex::new(session),
            playback,
            gateway,
            sequence_reserved: AtomicU64::new(sequence_floor),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn gateway(&self) -> &BroadcastGateway {
        &self.gateway
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub fn search_tracks(&self, query: &str) -> Vec<Track> {
        self.catalog.search(query)
    }

    /// Upload a track (operator)
    pub async fn add_track(
        &self,
        role: Role,
        title: &str,
        artist: &str,
        duration_seconds: u32,
    ) -> Result<Track> {
        role.require_operator("add track")?;
        let track = Track::new(title, artist, duration_seconds)?;
        self.store.save_track(&track).await?;
        self.catalog.insert(track.clone());
        info!("Added track {} '{}' by {}", track.id, track.title, track.artist);
        Ok(track)
    }

    /// Remove a track (operator)
    ///
    /// Fails with `TrackInUse` while an open round or a non-played queue
    /// entry refers to it. Holding the open slot and the session excludes
    /// a concurrent round open or enqueue from picking the track up.
    pub async fn remove_track(&self, role: Role, track_id: Uuid) -> Result<Track> {
        role.require_operator("remove track")?;

        let _slot = self.voting.lock_open_slot().await;
        let session = self.session.lock().await;

        if !self.catalog.contains(track_id) {
            return Err(Error::TrackNotFound(track_id));
        }
        if session.queue().references_track(track_id)
            || self.voting.open_round_references(track_id).await
        {
            return Err(Error::TrackInUse(track_id));
        }

        self.store.delete_track(track_id).await?;
        let track = self
            .catalog
            .remove(track_id)
            .ok_or(Error::TrackNotFound(track_id))?;
        info!("Removed track {} '{}'", track.id, track.title);
        Ok(track)
    }

    // ------------------------------------------------------------------
    // Voting rounds
    // ------------------------------------------------------------------

    /// Open a round (operator)
    pub async fn open_round(
        &self,
        role: Role,
        candidates: Vec<Uuid>,
        duration_seconds: Option<u32>,
    ) -> Result<TallySnapshot> {
        role.require_operator("open round")?;
        let now = time::now();
        let mut slot = self.voting.lock_open_slot().await;
        self.open_round_locked(&mut slot, candidates, duration_seconds, now)
            .await
    }

    async fn open_round_locked(
        &self,
        slot: &mut Option<Uuid>,
        candidates: Vec<Uuid>,
        duration_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<TallySnapshot> {
        if let Some(open_id) = *slot {
            match self.voting.get(open_id) {
                Some(handle) => {
                    let still_open = handle.lock().await.accepts_votes(now);
                    if still_open {
                        return Err(Error::RoundAlreadyOpen(open_id));
                    }
                    // Elapsed but not yet closed by the scheduler
                    self.close_locked(slot, handle, now).await;
                }
                None => *slot = None,
            }
        }

        self.catalog.validate_candidates(&candidates)?;
        let duration = duration_seconds.unwrap_or(self.config.default_round_seconds);
        let round = VotingRound::open(candidates, duration, now)?;

        // Stored before it becomes visible, so vote rows always have a parent
        self.store.save_round(&round.record()).await?;

        let round_id = round.id();
        let tally = round.snapshot(now);
        let session = self.session.lock().await;
        self.voting.insert(round);
        *slot = Some(round_id);

        info!(
            "Opened round {} with {} candidates for {}s",
            round_id,
            tally.candidates.len(),
            duration
        );
        self.gateway.publish_tally(tally.clone());
        self.broadcast_queue(&session, now).await;

        Ok(tally)
    }

    /// Submit a vote
    ///
    /// The cutoff is checked under the round lock: a vote counts only if the
    /// round is not closed and its deadline has not passed at the moment the
    /// tally is updated.
    pub async fn cast_vote(
        &self,
        round_id: Uuid,
        voter_id: &str,
        track_id: Uuid,
    ) -> Result<TallySnapshot> {
        let now = time::now();
        let handle = self
            .voting
            .get(round_id)
            .ok_or(Error::RoundNotFound(round_id))?;

        let tally = {
            let mut round = handle.lock().await;
            if let Err(e) = round.cast_vote(voter_id, track_id, now) {
                debug!("Vote by {} in round {} rejected: {}", voter_id, round_id, e);
                return Err(e);
            }
            let tally = round.snapshot(now);
            self.gateway.publish_tally(tally.clone());
            tally
        };

        debug!(
            "Vote by {} for {} in round {} ({} total)",
            voter_id, track_id, round_id, tally.total_votes
        );

        if let Err(e) = self.store.record_vote(round_id, voter_id, track_id, now).await {
            error!("Failed to persist vote in round {}: {}", round_id, e);
        }

        let session = self.session.lock().await;
        self.broadcast_queue(&session, now).await;

        Ok(tally)
    }

    /// Close a round (operator); closing twice returns the same tally
    ///
    /// A round already dropped from memory is answered from storage. Such a
    /// round was closed before a later one opened, so its result has been
    /// applied and nothing changes.
    pub async fn close_round(&self, role: Role, round_id: Uuid) -> Result<TallySnapshot> {
        role.require_operator("close round")?;
        let now = time::now();
        let mut slot = self.voting.lock_open_slot().await;
        match self.voting.get(round_id) {
            Some(handle) => Ok(self.close_locked(&mut slot, handle, now).await),
            None => self.stored_close(round_id, now).await,
        }
    }

    /// Tally of a round that is no longer held in memory
    async fn stored_close(&self, round_id: Uuid, now: DateTime<Utc>) -> Result<TallySnapshot> {
        let stored = self
            .store
            .load_round(round_id)
            .await?
            .ok_or(Error::RoundNotFound(round_id))?;
        let mut round = VotingRound::restore(stored)?;

        if round.close(now) {
            // The in-memory close happened but its write was lost
            warn!("Round {} was stored without a close time; recording it now", round_id);
            self.store.save_round(&round.record()).await?;
        }

        debug!("Close of evicted round {} answered from storage", round_id);
        Ok(round.snapshot(now))
    }

    /// Freeze a round and, the first time only, hand its result to the queue
    async fn close_locked(
        &self,
        slot: &mut Option<Uuid>,
        handle: RoundHandle,
        now: DateTime<Utc>,
    ) -> TallySnapshot {
        let mut session = self.session.lock().await;

        let (tally, record, newly_closed) = {
            let mut round = handle.lock().await;
            let newly_closed = round.close(now);
            let tally = round.snapshot(now);
            if newly_closed {
                self.gateway.publish_tally(tally.clone());
            }
            (tally, round.record(), newly_closed)
        };

        if *slot == Some(tally.round_id) {
            *slot = None;
        }
        if !newly_closed {
            return tally;
        }

        info!(
            "Closed round {} with {} votes",
            tally.round_id, tally.total_votes
        );

        if let Err(e) = self.store.save_round(&record).await {
            error!("Failed to persist close of round {}: {}", tally.round_id, e);
        }

        let mut touched = session
            .queue_mut()
            .apply_round_result(&tally, &self.catalog, now);
        let live = self.voting.live_tally(now).await;
        let playback_changed = self.settle(&mut session, now, live.as_ref(), &mut touched);

        self.broadcast_queue(&session, now).await;
        if playback_changed {
            self.broadcast_playback(&session);
        }
        self.persist_entries(&touched).await;

        tally
    }

    /// Tally of the latest round
    pub async fn current_tally(&self) -> Option<TallySnapshot> {
        self.voting.latest_tally(time::now()).await
    }

    // ------------------------------------------------------------------
    // Queue and playback
    // ------------------------------------------------------------------

    /// Place a catalog track into the queue (operator)
    pub async fn enqueue(&self, role: Role, track_id: Uuid) -> Result<QueueEntryInfo> {
        role.require_operator("enqueue")?;
        let now = time::now();
        let mut session = self.session.lock().await;

        if !self.catalog.contains(track_id) {
            return Err(Error::TrackNotFound(track_id));
        }

        let (entry, created) = session.queue_mut().enqueue(track_id, now);
        if !created {
            debug!("Track {} already queued as {}", track_id, entry.id);
            return Ok(entry.info());
        }

        info!("Enqueued track {} as entry {}", track_id, entry.id);
        let mut touched = vec![entry.clone()];
        let live = self.voting.live_tally(now).await;
        let playback_changed = self.settle(&mut session, now, live.as_ref(), &mut touched);

        self.broadcast_queue(&session, now).await;
        if playback_changed {
            self.broadcast_playback(&session);
        }
        self.persist_entries(&touched).await;

        // Settling may already have moved the entry on
        let info = session
            .queue()
            .entries()
            .find(|e| e.id == entry.id)
            .map(QueueEntry::info)
            .unwrap_or_else(|| entry.info());
        Ok(info)
    }

    /// Move the top-ranked queued entry into `next`
    ///
    /// Ranks the way the published queue order does, live round votes
    /// included. `QueueEmpty` leaves state unchanged. An occupied `next` is
    /// returned as is.
    pub async fn promote_top(&self) -> Result<QueueEntryInfo> {
        let now = time::now();
        let mut session = self.session.lock().await;
        let had_next = session.queue().next().map(|e| e.id);

        let live = self.voting.live_tally(now).await;
        let entry = session.queue_mut().promote_top(live.as_ref())?;
        if had_next != Some(entry.id) {
            info!("Promoted track {} to next", entry.track_id);
            self.broadcast_queue(&session, now).await;
            self.broadcast_playback(&session);
            self.persist_entries(std::slice::from_ref(&entry)).await;
        }
        Ok(entry.info())
    }

    /// Operator skip
    ///
    /// `expected` names the entry to skip; when omitted, the entry playing
    /// at call time is used. A skip that lost the race to another advance
    /// is a no-op returning the current state.
    pub async fn skip(&self, role: Role, expected: Option<Uuid>) -> Result<PlaybackSnapshot> {
        role.require_operator("skip")?;
        let expected = expected.or_else(|| self.playback.borrow().now_playing_entry_id());

        let mut session = self.session.lock().await;
        let now = time::now();
        let live = self.voting.live_tally(now).await;
        match session.skip(expected, now, live.as_ref()) {
            Some(advance) => self.after_advance(&session, advance, now).await,
            None => debug!("Skip of {:?} was a no-op", expected),
        }
        Ok(session.snapshot(&self.catalog))
    }

    /// Natural completion reported by the player (operator)
    pub async fn track_finished(&self, role: Role, entry_id: Uuid) -> Result<PlaybackSnapshot> {
        role.require_operator("finish track")?;
        let mut session = self.session.lock().await;
        let now = time::now();
        let live = self.voting.live_tally(now).await;
        if let Some(advance) = session.track_finished(entry_id, now, live.as_ref()) {
            self.after_advance(&session, advance, now).await;
        }
        Ok(session.snapshot(&self.catalog))
    }

    /// Lock-free playback snapshot
    pub fn playback_snapshot(&self) -> PlaybackSnapshot {
        self.playback.borrow().clone()
    }

    pub fn subscribe_playback(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.playback.subscribe()
    }

    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        let now = time::now();
        let session = self.session.lock().await;
        let live = self.voting.live_tally(now).await;
        session.queue().snapshot(live.as_ref())
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Time-driven work: close an elapsed round, open the next one when
    /// automatic rounds are on, finish a track whose duration ran out when
    /// automatic advance is on.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        {
            let mut slot = self.voting.lock_open_slot().await;

            if let Some(handle) = (*slot).and_then(|id| self.voting.get(id)) {
                let expired = {
                    let round = handle.lock().await;
                    !round.is_closed() && round.is_expired(now)
                };
                if expired {
                    let tally = self.close_locked(&mut slot, handle, now).await;
                    report.closed_round = Some(tally.round_id);
                }
            }

            if self.config.auto_rounds && slot.is_none() {
                let candidates = self.auto_candidates().await;
                if !candidates.is_empty() {
                    match self
                        .open_round_locked(&mut slot, candidates, None, now)
                        .await
                    {
                        Ok(tally) => report.opened_round = Some(tally.round_id),
                        Err(e) => warn!("Automatic round not opened: {}", e),
                    }
                }
            }
        }

        if self.config.auto_advance {
            let mut session = self.session.lock().await;
            let live = self.voting.live_tally(now).await;
            if let Some(entry_id) = session.due_to_finish(&self.catalog, now) {
                if let Some(advance) = session.track_finished(entry_id, now, live.as_ref()) {
                    report.finished_entry = Some(entry_id);
                    self.after_advance(&session, advance, now).await;
                }
            } else if let Some(advance) = session.start_if_idle(now, live.as_ref()) {
                self.after_advance(&session, advance, now).await;
            }
        }

        report
    }

    /// Candidates for an automatic round
    ///
    /// Tracks not queued or playing, least recently played first (never
    /// played before anything else), then by id.
    async fn auto_candidates(&self) -> Vec<Uuid> {
        let session = self.session.lock().await;
        let queue = session.queue();

        let mut tracks: Vec<(Option<DateTime<Utc>>, Uuid)> = self
            .catalog
            .list()
            .into_iter()
            .filter(|t| !queue.references_track(t.id))
            .map(|t| (queue.last_played(t.id), t.id))
            .collect();

        // None sorts before any time
        tracks.sort();

        tracks
            .into_iter()
            .take(self.config.candidates_per_round)
            .map(|(_, id)| id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Helpers (callers hold the session lock)
    // ------------------------------------------------------------------

    /// Start playback if idle, otherwise refill an empty `next`
    fn settle(
        &self,
        session: &mut PlaybackSession,
        now: DateTime<Utc>,
        live: Option<&TallySnapshot>,
        touched: &mut Vec<QueueEntry>,
    ) -> bool {
        if let Some(advance) = session.start_if_idle(now, live) {
            touched.extend(advance.changed_entries());
            true
        } else if let Some(promoted) = session.refill_next(live) {
            info!("Promoted track {} to next", promoted.track_id);
            touched.push(promoted);
            true
        } else {
            false
        }
    }

    async fn after_advance(&self, session: &PlaybackSession, advance: Advance, now: DateTime<Utc>) {
        self.broadcast_queue(session, now).await;
        self.broadcast_playback(session);
        self.persist_entries(&advance.changed_entries()).await;
    }

    async fn broadcast_queue(&self, session: &PlaybackSession, now: DateTime<Utc>) {
        let live = self.voting.live_tally(now).await;
        self.gateway
            .publish_queue(session.queue().snapshot(live.as_ref()));
        self.reserve_sequences().await;
    }

    /// Keep the stored sequence floor ahead of the numbers being handed out
    ///
    /// Every mutating path ends in a queue broadcast, so checking here with
    /// half a block of headroom keeps issued numbers below the floor.
    async fn reserve_sequences(&self) {
        let last = self.gateway.last_sequence();
        if last + SEQUENCE_BLOCK / 2 <= self.sequence_reserved.load(Ordering::Acquire) {
            return;
        }

        let target = last + SEQUENCE_BLOCK;
        match self.store.save_sequence_floor(target).await {
            Ok(()) => {
                self.sequence_reserved.fetch_max(target, Ordering::AcqRel);
                debug!("Reserved event sequence numbers up to {}", target);
            }
            Err(e) => error!("Failed to reserve event sequence numbers: {}", e),
        }
    }

    fn broadcast_playback(&self, session: &PlaybackSession) {
        let snapshot = session.snapshot(&self.catalog);
        self.playback.send_replace(snapshot.clone());
        self.gateway.publish_playback(snapshot);
    }

    async fn persist_entries(&self, entries: &[QueueEntry]) {
        for entry in entries {
            if let Err(e) = self.store.save_queue_entry(entry).await {
                error!("Failed to persist queue entry {}: {}", entry.id, e);
            }
        }
    }
}
