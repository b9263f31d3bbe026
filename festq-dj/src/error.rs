//! Error types for festq-dj
//!
//! Every domain condition is recoverable and reported synchronously to the
//! caller. `DuplicateVote` and `QueueEmpty` are steady-state outcomes, see
//! [`Error::is_steady_state`].

use thiserror::Error;
use uuid::Uuid;

/// Main error type for festq-dj
#[derive(Error, Debug)]
pub enum Error {
    /// Candidate set empty, duplicated, or naming unknown tracks
    #[error("Invalid candidate set: {0}")]
    InvalidCandidateSet(String),

    /// Only one round may be open at a time
    #[error("Round {0} is already open")]
    RoundAlreadyOpen(Uuid),

    /// Round elapsed or was force-closed
    #[error("Round {0} is closed")]
    RoundClosed(Uuid),

    /// Track is not a candidate of the round
    #[error("Track {track_id} is not a candidate in round {round_id}")]
    UnknownCandidate { round_id: Uuid, track_id: Uuid },

    /// Voter already voted in this round
    #[error("Voter {voter_id} already voted in round {round_id}")]
    DuplicateVote { round_id: Uuid, voter_id: String },

    /// No queued entry to promote
    #[error("Queue is empty")]
    QueueEmpty,

    /// Operator-only operation without operator claim
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Round not found: {0}")]
    RoundNotFound(Uuid),

    #[error("Track not found: {0}")]
    TrackNotFound(Uuid),

    /// Track referenced by an open round or a non-played queue entry
    #[error("Track {0} is in use")]
    TrackInUse(Uuid),

    #[error("Queue entry not found: {0}")]
    EntryNotFound(Uuid),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] festq_common::Error),

    /// Stored data that no longer parses
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),
}

impl Error {
    /// Expected conditions that are reported as outcomes, not failures
    pub fn is_steady_state(&self) -> bool {
        matches!(self, Error::DuplicateVote { .. } | Error::QueueEmpty)
    }

    /// Text shown to end users
    pub fn user_message(&self) -> String {
        match self {
            Error::DuplicateVote { .. } => "already voted this round".to_string(),
            Error::QueueEmpty => "waiting for votes".to_string(),
            Error::RoundClosed(_) => "voting for this round has ended".to_string(),
            Error::UnknownCandidate { .. } => "that track is not on this ballot".to_string(),
            Error::Unauthorized(_) => "operator access required".to_string(),
            other => other.to_string(),
        }
    }
}

/// Convenience Result type using festq-dj Error
pub type Result<T> = std::result::Result<T, Error>;
