//! Frame persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, Sqlite, Transaction};
use sv_common::Result;
use uuid::Uuid;

use crate::models::FrameRecord;

fn frame_from_row(row: &SqliteRow) -> Result<FrameRecord> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");

    Ok(FrameRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse frame id: {}", e)))?,
        session_id: Uuid::parse_str(&session_id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse session id: {}", e)))?,
        frame_index: row.get("frame_index"),
        timestamp_ms: row.get("timestamp_ms"),
        timestamp_formatted: row.get("timestamp_formatted"),
        image_path: row.get("image_path"),
        is_keyframe: row.get::<i64, _>("is_keyframe") != 0,
        analyzed: row.get::<i64, _>("analyzed") != 0,
    })
}

/// Insert a batch of frames in one transaction
///
/// The sampler calls this every commit interval so a crash loses at
/// most one batch of rows, never the whole stage.
pub async fn insert_frames(pool: &SqlitePool, frames: &[FrameRecord]) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for frame in frames {
        insert_frame_tx(&mut tx, frame).await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Insert one frame, keeping the existing row on re-runs
///
/// A reset session samples the same source again; the existing row
/// (and its analyzed flag) wins so findings survive the re-run.
pub async fn insert_frame_tx(
    tx: &mut Transaction<'_, Sqlite>,
    frame: &FrameRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO frames (
            id, session_id, frame_index, timestamp_ms,
            timestamp_formatted, image_path, is_keyframe, analyzed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id, frame_index) DO NOTHING
        "#,
    )
    .bind(frame.id.to_string())
    .bind(frame.session_id.to_string())
    .bind(frame.frame_index)
    .bind(frame.timestamp_ms)
    .bind(&frame.timestamp_formatted)
    .bind(&frame.image_path)
    .bind(frame.is_keyframe as i64)
    .bind(frame.analyzed as i64)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Frames for a session in index order, paged
pub async fn list_frames(
    pool: &SqlitePool,
    session_id: Uuid,
    skip: i64,
    limit: i64,
) -> Result<Vec<FrameRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM frames
        WHERE session_id = ?
        ORDER BY frame_index
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(session_id.to_string())
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;

    rows.iter().map(frame_from_row).collect()
}

/// Frames not yet analyzed, in index order
///
/// Drives the resumable analysis stage: a re-run picks up exactly the
/// frames the previous run never finished.
pub async fn list_unanalyzed_frames(
    pool: &SqlitePool,
    session_id: Uuid,
) -> Result<Vec<FrameRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM frames
        WHERE session_id = ? AND analyzed = 0
        ORDER BY frame_index
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(frame_from_row).collect()
}

/// Mark a frame analyzed inside an existing transaction
pub async fn mark_analyzed_tx(
    tx: &mut Transaction<'_, Sqlite>,
    frame_id: Uuid,
) -> Result<()> {
    sqlx::query("UPDATE frames SET analyzed = 1 WHERE id = ?")
        .bind(frame_id.to_string())
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Total frame count for a session
pub async fn count_frames(pool: &SqlitePool, session_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM frames WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count)
}
