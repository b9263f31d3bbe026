//! Event types for the festq broadcast channel
//!
//! Provides the event envelope and the sequencing EventBus shared by the
//! queue service and any client-facing transport.

mod playback_types;
mod queue_types;
mod tally_types;

pub use playback_types::{EntryStatus, NowPlaying, PlaybackSnapshot, PlaybackState};
pub use queue_types::{QueueEntryInfo, QueueSnapshot, RankedTrack};
pub use tally_types::{CandidateTally, RoundStatus, TallySnapshot};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Broadcast event payloads
///
/// Serialized adjacently tagged so that, once flattened into an
/// [`Envelope`], the wire shape is
/// `{"sequenceNumber": n, "type": "tally"|"queue"|"playback", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum FestEvent {
    /// Tally of the open (or just closed) round changed
    Tally(TallySnapshot),
    /// Queue order changed
    Queue(QueueSnapshot),
    /// Playback state changed
    Playback(PlaybackSnapshot),
}

impl FestEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self {
            FestEvent::Tally(_) => "tally",
            FestEvent::Queue(_) => "queue",
            FestEvent::Playback(_) => "playback",
        }
    }
}

/// A sequenced event as delivered to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub sequence_number: u64,
    #[serde(flatten)]
    pub event: FestEvent,
}

/// Result of a replay request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replay {
    /// Retained envelopes newer than the requested sequence number
    pub envelopes: Vec<Envelope>,
    /// False when some requested envelopes already fell out of retention, or
    /// when `since` is ahead of this bus (a cursor from an earlier run); the
    /// client must then resynchronize from current snapshots.
    pub complete: bool,
    pub last_sequence: u64,
}

#[derive(Debug, Default)]
struct BusState {
    last_sequence: u64,
    recent: VecDeque<Envelope>,
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers never block producers)
/// - Multiple concurrent subscribers
/// - Lagged receivers are detected by the subscriber, and recover through
///   [`EventBus::replay_since`]
///
/// Sequence assignment and channel send happen under one lock, so the order
/// in which subscribers receive envelopes always matches their sequence
/// numbers.
///
/// # Examples
///
/// ```
/// use festq_common::events::{EventBus, FestEvent, PlaybackSnapshot};
///
/// let bus = EventBus::new(100, 16);
/// let mut rx = bus.subscribe();
///
/// let envelope = bus.emit(FestEvent::Playback(PlaybackSnapshot::empty()));
/// assert_eq!(envelope.sequence_number, 1);
/// assert_eq!(rx.try_recv().unwrap().sequence_number, 1);
/// ```
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
    capacity: usize,
    replay_depth: usize,
    state: Mutex<BusState>,
}

impl EventBus {
    /// Creates a new EventBus
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of envelopes buffered per subscriber before the
    ///   slowest subscriber starts lagging
    /// * `replay_depth` - Number of most recent envelopes retained for gap
    ///   recovery (0 disables replay)
    pub fn new(capacity: usize, replay_depth: usize) -> Self {
        Self::with_last_sequence(capacity, replay_depth, 0)
    }

    /// Creates an EventBus whose first envelope is numbered
    /// `last_sequence + 1`
    ///
    /// Used after a restart so sequence numbers keep rising across runs.
    pub fn with_last_sequence(capacity: usize, replay_depth: usize, last_sequence: u64) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity,
            replay_depth,
            state: Mutex::new(BusState {
                last_sequence,
                recent: VecDeque::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BusState> {
        // State holds plain data; a panic mid-update cannot break it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next sequence number and fan the event out
    ///
    /// Delivery is fire-and-forget: having no subscribers is not an error.
    pub fn emit(&self, event: FestEvent) -> Envelope {
        let mut state = self.lock_state();
        state.last_sequence += 1;
        let envelope = Envelope {
            sequence_number: state.last_sequence,
            event,
        };

        if self.replay_depth > 0 {
            if state.recent.len() == self.replay_depth {
                state.recent.pop_front();
            }
            state.recent.push_back(envelope.clone());
        }

        let _ = self.tx.send(envelope.clone());
        envelope
    }

    /// Subscribe to future envelopes
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number of the most recently emitted envelope (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.lock_state().last_sequence
    }

    /// Retained envelopes with a sequence number greater than `since`
    pub fn replay_since(&self, since: u64) -> Replay {
        let state = self.lock_state();
        let envelopes: Vec<Envelope> = state
            .recent
            .iter()
            .filter(|e| e.sequence_number > since)
            .cloned()
            .collect();

        let complete = if since == state.last_sequence {
            true
        } else if since > state.last_sequence {
            // Never issued by this bus
            false
        } else {
            match state.recent.front() {
                Some(oldest) => oldest.sequence_number <= since + 1,
                None => false,
            }
        };

        Replay {
            envelopes,
            complete,
            last_sequence: state.last_sequence,
        }
    }
}
