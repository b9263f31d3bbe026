//! HTTP API for the queue service
//!
//! Public routes serve listeners (catalog, current round, votes, queue,
//! playback, events). Routes under `/api/v1/admin` need the operator claim
//! that [`auth_middleware::role_claim`] attaches to each request.

pub mod auth_middleware;
pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
