//! # Festival Live Queue Library (festq-dj)
//!
//! Voting rounds, the ranked play queue and the playback session for a live
//! festival DJ set.
//!
//! **Purpose:** Accept audience votes on candidate tracks, turn closed rounds
//! into queue entries, advance playback, and broadcast every state change to
//! connected listeners over HTTP/SSE.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod playback;
pub mod queue;
pub mod ranking;
pub mod scheduler;
pub mod service;
pub mod voting;

pub use error::{Error, Result};
pub use service::{DjService, Role};
