//! Track catalog
//!
//! Immutable track metadata that rounds and the queue refer to by id.
//! Backed by a sharded concurrent map: readers never wait on each other,
//! and writes (upload/removal) are rare.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Immutable catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub duration_seconds: u32,
}

impl Track {
    /// Create a track with a fresh id
    pub fn new(title: &str, artist: &str, duration_seconds: u32) -> Result<Self> {
        let title = title.trim();
        let artist = artist.trim();
        if title.is_empty() {
            return Err(Error::BadRequest("title must not be empty".to_string()));
        }
        if artist.is_empty() {
            return Err(Error::BadRequest("artist must not be empty".to_string()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            artist: artist.to_string(),
            duration_seconds,
        })
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.artist.to_lowercase().contains(needle)
    }
}

/// Catalog of known tracks
#[derive(Debug, Default)]
pub struct TrackCatalog {
    tracks: DashMap<Uuid, Track>,
}

impl TrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from previously persisted tracks
    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let catalog = Self::new();
        for track in tracks {
            catalog.tracks.insert(track.id, track);
        }
        catalog
    }

    /// Add a track; entries are never replaced once present
    ///
    /// Returns false if the id is already in the catalog.
    pub fn insert(&self, track: Track) -> bool {
        match self.tracks.entry(track.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(track);
                true
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Track> {
        self.tracks.get(&id).map(|t| t.value().clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Remove a track
    ///
    /// Callers enforce the reference rule (open rounds, live queue entries)
    /// before calling this.
    pub(crate) fn remove(&self, id: Uuid) -> Option<Track> {
        self.tracks.remove(&id).map(|(_, track)| track)
    }

    /// All tracks ordered by artist, title, id
    pub fn list(&self) -> Vec<Track> {
        let mut tracks: Vec<Track> = self.tracks.iter().map(|t| t.value().clone()).collect();
        sort_tracks(&mut tracks);
        tracks
    }

    /// Case-insensitive match on title or artist; empty query lists all
    pub fn search(&self, query: &str) -> Vec<Track> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list();
        }

        let mut tracks: Vec<Track> = self
            .tracks
            .iter()
            .filter(|t| t.value().matches(&needle))
            .map(|t| t.value().clone())
            .collect();
        sort_tracks(&mut tracks);
        tracks
    }

    /// Check that `ids` is a valid round candidate set
    ///
    /// Non-empty, no duplicates, every id known.
    pub fn validate_candidates(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::InvalidCandidateSet(
                "candidate set must not be empty".to_string(),
            ));
        }

        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(Error::InvalidCandidateSet(format!("duplicate track {}", id)));
            }
            if !self.contains(*id) {
                return Err(Error::InvalidCandidateSet(format!("unknown track {}", id)));
            }
        }

        Ok(())
    }
}

fn sort_tracks(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| {
        a.artist
            .to_lowercase()
            .cmp(&b.artist.to_lowercase())
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
