//! # festq Common Library
//!
//! Shared code for the festq crates:
//! - Broadcast event envelope and sequencing EventBus
//! - Database initialization and row models
//! - Bootstrap configuration loading
//! - Operator API authentication primitives
//! - Time utilities

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
