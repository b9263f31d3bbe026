//! Shared HTTP API primitives
//!
//! Contains only pure functions and database operations; the axum
//! middleware wrapping them lives in the service crate.

pub mod auth;

#[cfg(feature = "sqlx")]
pub use auth::load_shared_secret;
pub use auth::{
    calculate_hash, to_canonical_json, validate_hash, validate_timestamp, ApiAuthError, AuthFields,
};
