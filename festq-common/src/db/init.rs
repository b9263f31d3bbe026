//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates all tables.
//! Every statement is idempotent, so this runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets vote writes proceed while snapshot reads are running
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Single connection: every `sqlite::memory:` connection is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_settings_table(pool).await?;
    create_tracks_table(pool).await?;
    create_voting_rounds_table(pool).await?;
    create_round_votes_table(pool).await?;
    create_queue_entries_table(pool).await?;
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_tracks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL CHECK (duration_seconds >= 0),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_voting_rounds_table(pool: &SqlitePool) -> Result<()> {
    // candidate_track_ids: JSON array in creation order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voting_rounds (
            guid TEXT PRIMARY KEY,
            candidate_track_ids TEXT NOT NULL,
            started_at TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            closed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_voting_rounds_started ON voting_rounds(started_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_round_votes_table(pool: &SqlitePool) -> Result<()> {
    // Primary key enforces one vote per voter per round at the storage layer too
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS round_votes (
            round_guid TEXT NOT NULL REFERENCES voting_rounds(guid) ON DELETE CASCADE,
            voter_id TEXT NOT NULL,
            track_guid TEXT NOT NULL,
            cast_at TEXT NOT NULL,
            PRIMARY KEY (round_guid, voter_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_queue_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_entries (
            guid TEXT PRIMARY KEY,
            track_guid TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('queued', 'next', 'playing', 'played')),
            votes INTEGER NOT NULL DEFAULT 0,
            vote_count_at_promotion INTEGER,
            added_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_entries_status ON queue_entries(status)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
