//! Summary persistence

use sqlx::{Row, SqlitePool};
use sv_common::Result;
use uuid::Uuid;

use crate::models::{KeyFinding, SessionSummary};

/// Save a summary, replacing any earlier one for the session
pub async fn save_summary(pool: &SqlitePool, summary: &SessionSummary) -> Result<()> {
    let key_findings = serde_json::to_string(&summary.key_findings).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to serialize key_findings: {}", e))
    })?;

    sqlx::query(
        r#"
        INSERT INTO summaries (
            id, session_id, overall_summary, key_findings,
            total_analyzed, high_risk_count, generated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            overall_summary = excluded.overall_summary,
            key_findings = excluded.key_findings,
            total_analyzed = excluded.total_analyzed,
            high_risk_count = excluded.high_risk_count,
            generated_at = excluded.generated_at
        "#,
    )
    .bind(summary.id.to_string())
    .bind(summary.session_id.to_string())
    .bind(&summary.overall_summary)
    .bind(&key_findings)
    .bind(summary.total_analyzed)
    .bind(summary.high_risk_count)
    .bind(summary.generated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load the summary for a session
pub async fn load_summary(pool: &SqlitePool, session_id: Uuid) -> Result<Option<SessionSummary>> {
    let row = sqlx::query("SELECT * FROM summaries WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.get("id");
    let key_findings: String = row.get("key_findings");
    let key_findings: Vec<KeyFinding> = serde_json::from_str(&key_findings).map_err(|e| {
        sv_common::Error::Internal(format!("Failed to deserialize key_findings: {}", e))
    })?;

    let generated_at: String = row.get("generated_at");
    let generated_at = chrono::DateTime::parse_from_rfc3339(&generated_at)
        .map_err(|e| sv_common::Error::Internal(format!("Failed to parse generated_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(Some(SessionSummary {
        id: Uuid::parse_str(&id)
            .map_err(|e| sv_common::Error::Internal(format!("Failed to parse summary id: {}", e)))?,
        session_id,
        overall_summary: row.get("overall_summary"),
        key_findings,
        total_analyzed: row.get("total_analyzed"),
        high_risk_count: row.get("high_risk_count"),
        generated_at,
    }))
}
