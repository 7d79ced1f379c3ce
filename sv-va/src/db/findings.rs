//! Finding persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use sv_common::events::RiskLevel;
use sv_common::Result;
use uuid::Uuid;

use crate::models::Finding;

fn finding_from_row(row: &SqliteRow) -> Result<Finding> {
    let id: String = row.get("id");
    let frame_id: String = row.get("frame_id");
    let session_id: String = row.get("session_id");

    let risk_level: String = row.get("risk_level");
    let risk_level: RiskLevel = serde_json::from_str(&risk_level).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to deserialize risk_level: {}", e))
    })?;

    let detected_features: String = row.get("detected_features");
    let detected_features: Vec<String> = serde_json::from_str(&detected_features).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to deserialize detected_features: {}", e))
    })?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(Finding {
        id: Uuid::parse_str(&id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse finding id: {}", e)))?,
        frame_id: Uuid::parse_str(&frame_id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse frame id: {}", e)))?,
        session_id: Uuid::parse_str(&session_id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse session id: {}", e)))?,
        finding: row.get("finding"),
        location: row.get("location"),
        risk_level,
        confidence: row.get("confidence"),
        suggested_action: row.get("suggested_action"),
        detected_features,
        raw_output: row.get("raw_output"),
        inference_time_ms: row.get("inference_time_ms"),
        model_name: row.get("model_name"),
        created_at,
    })
}

/// Insert a finding inside an existing transaction
///
/// One finding per frame is enforced by the UNIQUE constraint on
/// frame_id; a re-run never double-inserts because it only visits
/// unanalyzed frames.
pub async fn insert_finding_tx(
    tx: &mut Transaction<'_, Sqlite>,
    finding: &Finding,
) -> Result<()> {
    let risk_level = serde_json::to_string(&finding.risk_level).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to serialize risk_level: {}", e))
    })?;
    let detected_features = serde_json::to_string(&finding.detected_features).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to serialize detected_features: {}", e))
    })?;

    sqlx::query(
        r#"
        INSERT INTO findings (
            id, frame_id, session_id, finding, location, risk_level,
            confidence, suggested_action, detected_features, raw_output,
            inference_time_ms, model_name, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(finding.id.to_string())
    .bind(finding.frame_id.to_string())
    .bind(finding.session_id.to_string())
    .bind(&finding.finding)
    .bind(&finding.location)
    .bind(&risk_level)
    .bind(finding.confidence)
    .bind(&finding.suggested_action)
    .bind(&detected_features)
    .bind(&finding.raw_output)
    .bind(finding.inference_time_ms)
    .bind(&finding.model_name)
    .bind(finding.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Insert a single finding outside a batch (live session save path)
pub async fn insert_finding(pool: &SqlitePool, finding: &Finding) -> Result<()> {
    let mut tx = pool.begin().await?;
    insert_finding_tx(&mut tx, finding).await?;
    tx.commit().await?;
    Ok(())
}

/// All findings for a session, in frame order
pub async fn list_findings(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<Finding>> {
    let rows = sqlx::query(
        r#"
        SELECT f.* FROM findings f
        JOIN frames fr ON fr.id = f.frame_id
        WHERE f.session_id = ?
        ORDER BY fr.frame_index
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(finding_from_row).collect()
}

/// Count findings for a session
pub async fn count_findings(pool: &SqlitePool, session_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM findings WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count)
}
