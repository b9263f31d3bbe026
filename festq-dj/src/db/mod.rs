//! Database access layer
//!
//! The service talks to storage only through the [`Store`] trait.

mod store;

pub use store::{SqliteStore, Store};
