//! Session persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use sv_common::Result;
use uuid::Uuid;

use crate::models::{AnalysisSession, SessionKind, SessionStatus, VideoMetadata};

fn parse_datetime(s: &str, field: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| sv_common::Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<AnalysisSession> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to parse session id: {}", e)))?;

    let kind: String = row.get("kind");
    let kind: SessionKind = serde_json::from_str(&kind)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to deserialize kind: {}", e)))?;

    let status: String = row.get("status");
    let status: SessionStatus = serde_json::from_str(&status)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to deserialize status: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = parse_datetime(&created_at, "created_at")?;

    let started_at: Option<String> = row.get("started_at");
    let started_at = started_at
        .map(|s| parse_datetime(&s, "started_at"))
        .transpose()?;

    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|s| parse_datetime(&s, "completed_at"))
        .transpose()?;

    Ok(AnalysisSession {
        id,
        kind,
        status,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        title: row.get("title"),
        procedure_type: row.get("procedure_type"),
        video_path: row.get("video_path"),
        video: VideoMetadata {
            duration_seconds: row.get("duration_seconds"),
            fps: row.get("fps"),
            size_bytes: row.get("size_bytes"),
            width: row.get("width"),
            height: row.get("height"),
        },
        frame_count: row.get("frame_count"),
        export_path: row.get("export_path"),
        error: row.get("error"),
        created_at,
        started_at,
        completed_at,
    })
}

/// Save a session, inserting or updating in place
pub async fn save_session(pool: &SqlitePool, session: &AnalysisSession) -> Result<()> {
    let id = session.id.to_string();
    let kind = serde_json::to_string(&session.kind)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to serialize kind: {}", e)))?;
    let status = serde_json::to_string(&session.status)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to serialize status: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, kind, status, progress, title, procedure_type,
            video_path, duration_seconds, fps, size_bytes, width, height,
            frame_count, export_path, error,
            created_at, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            progress = excluded.progress,
            duration_seconds = excluded.duration_seconds,
            fps = excluded.fps,
            size_bytes = excluded.size_bytes,
            width = excluded.width,
            height = excluded.height,
            frame_count = excluded.frame_count,
            export_path = excluded.export_path,
            error = excluded.error,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(&id)
    .bind(&kind)
    .bind(&status)
    .bind(session.progress as i64)
    .bind(&session.title)
    .bind(&session.procedure_type)
    .bind(&session.video_path)
    .bind(session.video.duration_seconds)
    .bind(session.video.fps)
    .bind(session.video.size_bytes)
    .bind(session.video.width)
    .bind(session.video.height)
    .bind(session.frame_count)
    .bind(&session.export_path)
    .bind(&session.error)
    .bind(session.created_at.to_rfc3339())
    .bind(session.started_at.map(|dt| dt.to_rfc3339()))
    .bind(session.completed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a session by id
pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<AnalysisSession>> {
    let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// List sessions, newest first
pub async fn list_sessions(pool: &SqlitePool) -> Result<Vec<AnalysisSession>> {
    let rows = sqlx::query("SELECT * FROM sessions ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(session_from_row).collect()
}

/// Check whether any session is queued or running
///
/// Used to reject a second processing trigger while one is in flight.
pub async fn has_active_session(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM sessions
        WHERE status NOT IN ('"completed"', '"failed"')
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Delete a session and everything hanging off it
pub async fn delete_session_cascade(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    let id = session_id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM findings WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM frames WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM summaries WHERE session_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Mark a session failed directly in the database
///
/// Fallback path for when the in-memory session copy is unavailable
/// (for instance the worker hit an error before loading it).
pub async fn mark_session_failed(
    pool: &SqlitePool,
    session_id: Uuid,
    stage: &str,
    message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET status = '"failed"',
            error = ?,
            completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(format!("{}: {}", stage, message))
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Return a stuck or terminal session to pending
///
/// A processing session whose worker died stays `processing` forever;
/// this is the explicit operator escape hatch. Frames already analyzed
/// keep their findings, so a re-run resumes where it stopped.
pub async fn reset_session(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET status = '"pending"',
            progress = 0,
            error = NULL,
            completed_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
