//! Broadcast gateway
//!
//! Fans tally, queue and playback snapshots out to every connected client
//! through the sequencing [`EventBus`]. Delivery is fire-and-forget; clients
//! that miss envelopes detect the gap from the sequence numbers and recover
//! through [`BroadcastGateway::replay_since`] or the current snapshots.

use festq_common::events::{
    Envelope, EventBus, FestEvent, PlaybackSnapshot, QueueSnapshot, Replay, TallySnapshot,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct BroadcastGateway {
    bus: EventBus,
}

impl BroadcastGateway {
    /// # Arguments
    ///
    /// * `capacity` - Envelopes buffered per subscriber
    /// * `replay_depth` - Envelopes retained for gap recovery
    pub fn new(capacity: usize, replay_depth: usize) -> Self {
        Self::with_last_sequence(capacity, replay_depth, 0)
    }

    /// Gateway whose numbering resumes after `last_sequence`
    pub fn with_last_sequence(capacity: usize, replay_depth: usize, last_sequence: u64) -> Self {
        info!(
            "Broadcast gateway initialized (capacity {}, replay depth {}, sequence from {})",
            capacity,
            replay_depth,
            last_sequence + 1
        );
        Self {
            bus: EventBus::with_last_sequence(capacity, replay_depth, last_sequence),
        }
    }

    pub fn publish_tally(&self, tally: TallySnapshot) -> Envelope {
        self.publish(FestEvent::Tally(tally))
    }

    pub fn publish_queue(&self, queue: QueueSnapshot) -> Envelope {
        self.publish(FestEvent::Queue(queue))
    }

    pub fn publish_playback(&self, playback: PlaybackSnapshot) -> Envelope {
        self.publish(FestEvent::Playback(playback))
    }

    fn publish(&self, event: FestEvent) -> Envelope {
        let kind = event.kind();
        let envelope = self.bus.emit(event);
        debug!(
            "Broadcast {} #{} to {} listeners",
            kind,
            envelope.sequence_number,
            self.bus.subscriber_count()
        );
        envelope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }

    pub fn replay_since(&self, since: u64) -> Replay {
        self.bus.replay_since(since)
    }

    /// Connected broadcast subscribers
    pub fn listener_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    pub fn last_sequence(&self) -> u64 {
        self.bus.last_sequence()
    }
}
