//! Database access for the video analysis service
//!
//! SQLite via sqlx. Tables are created on startup if missing; there is
//! no migration machinery beyond that.

pub mod findings;
pub mod frames;
pub mod sessions;
pub mod summaries;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create service tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            title TEXT NOT NULL,
            procedure_type TEXT NOT NULL,
            video_path TEXT,
            duration_seconds REAL,
            fps REAL,
            size_bytes INTEGER,
            width INTEGER,
            height INTEGER,
            frame_count INTEGER,
            export_path TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS frames (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            frame_index INTEGER NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            timestamp_formatted TEXT NOT NULL,
            image_path TEXT NOT NULL,
            is_keyframe INTEGER NOT NULL DEFAULT 0,
            analyzed INTEGER NOT NULL DEFAULT 0,
            UNIQUE(session_id, frame_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            frame_id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL,
            finding TEXT NOT NULL,
            location TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            confidence REAL NOT NULL,
            suggested_action TEXT NOT NULL,
            detected_features TEXT NOT NULL DEFAULT '[]',
            raw_output TEXT NOT NULL DEFAULT '',
            inference_time_ms INTEGER NOT NULL DEFAULT 0,
            model_name TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE,
            overall_summary TEXT NOT NULL,
            key_findings TEXT NOT NULL DEFAULT '[]',
            total_analyzed INTEGER NOT NULL DEFAULT 0,
            high_risk_count INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_frames_session ON frames(session_id, frame_index)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_session ON findings(session_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (sessions, frames, findings, summaries)");

    Ok(())
}
