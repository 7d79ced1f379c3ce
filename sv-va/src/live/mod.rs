//! Live session handling
//!
//! A live session is the timeline buffer plus a save path that turns
//! buffered findings into a persisted, completed session. Saved live
//! sessions get synthetic frames spaced at the snapshot capture
//! interval and flow through the same summary and export stages as
//! recorded sessions.

pub mod timeline;

use sqlx::SqlitePool;
use sv_common::events::{EventBus, RiskLevel, ScopeEvent};
use uuid::Uuid;

use crate::db;
use crate::error::ApiError;
use crate::models::{AnalysisSession, Finding, FrameRecord, SessionStatus};
use crate::services::orchestrator::ProgressReporter;
use crate::services::{exporter, summarizer};
use crate::storage::FrameStore;
use timeline::TimelineEntry;

/// Snapshot capture cadence assumed for synthetic frame timestamps
const CAPTURE_INTERVAL_MS: i64 = 3000;

/// What the save path hands back to the API
#[derive(Debug)]
pub struct SaveOutcome {
    pub session_id: Uuid,
    pub findings_count: usize,
    pub high_risk_count: usize,
    pub export_available: bool,
}

/// Record a mid-save failure so the session does not sit in
/// `processing` with no worker attached
async fn fail_live_save(pool: &SqlitePool, session_id: Uuid, stage: &str, message: &str) {
    if let Err(e) = db::sessions::mark_session_failed(pool, session_id, stage, message).await {
        tracing::warn!("Could not mark live session {} failed: {}", session_id, e);
    }
}

/// Persist a live timeline as a completed session
///
/// Entries become synthetic frames: index is the timeline position,
/// timestamp is position times the capture interval. The latest
/// snapshot image, when present, is stored per frame so exports have
/// something to show. Summary and export reuse the pipeline stages.
#[allow(clippy::too_many_arguments)]
pub async fn save_live_session(
    pool: &SqlitePool,
    store: &FrameStore,
    bus: &EventBus,
    session_id: Uuid,
    title: String,
    procedure_type: String,
    include_frames: bool,
    entries: &[TimelineEntry],
    latest_snapshot: Option<Vec<u8>>,
) -> Result<SaveOutcome, ApiError> {
    if entries.is_empty() {
        return Err(ApiError::BadRequest("No findings to save".to_string()));
    }

    let mut session = AnalysisSession::new_live(title, procedure_type);
    session.id = session_id;
    session.frame_count = Some(entries.len() as i64);
    session.transition_to(SessionStatus::Processing);
    db::sessions::save_session(pool, &session)
        .await
        .map_err(ApiError::Common)?;

    let mut high_risk_count = 0usize;
    for (idx, entry) in entries.iter().enumerate() {
        let timestamp_ms = idx as i64 * CAPTURE_INTERVAL_MS;

        let image_path = match &latest_snapshot {
            Some(jpeg) => match store.save_frame_jpeg(session_id, idx as i64, jpeg) {
                Ok(path) => path.display().to_string(),
                Err(e) => {
                    tracing::warn!("Could not save live frame image {}: {}", idx, e);
                    String::new()
                }
            },
            None => String::new(),
        };

        let mut frame = FrameRecord::new(
            session_id,
            idx as i64,
            timestamp_ms,
            image_path,
            false,
        );
        frame.analyzed = true;
        if let Err(e) = db::frames::insert_frames(pool, std::slice::from_ref(&frame)).await {
            fail_live_save(pool, session_id, "save", &e.to_string()).await;
            return Err(ApiError::Common(e));
        }

        let finding = Finding {
            id: Uuid::new_v4(),
            frame_id: frame.id,
            session_id,
            finding: entry.finding.finding.clone(),
            location: entry.finding.location.clone(),
            risk_level: entry.finding.risk_level,
            confidence: entry.finding.confidence,
            suggested_action: entry.finding.suggested_action.clone(),
            detected_features: entry.finding.detected_features.clone(),
            raw_output: entry.raw_output.clone(),
            inference_time_ms: 0,
            model_name: String::new(),
            created_at: entry.recorded_at,
        };
        if let Err(e) = db::findings::insert_finding(pool, &finding).await {
            fail_live_save(pool, session_id, "save", &e.to_string()).await;
            return Err(ApiError::Common(e));
        }

        if entry.finding.risk_level == RiskLevel::High {
            high_risk_count += 1;
        }
    }

    let reporter = ProgressReporter::new(pool.clone(), bus.clone(), session_id, 80);
    if let Err(e) = summarizer::generate_summary(pool, session_id, &reporter).await {
        fail_live_save(pool, session_id, "summary", &e.to_string()).await;
        return Err(ApiError::Internal(e.to_string()));
    }

    let export_available =
        match exporter::export_session(pool, store, &session, include_frames, &reporter).await {
            Ok(export_path) => {
                session.export_path = Some(export_path.display().to_string());
                bus.emit_lossy(ScopeEvent::ExportReady {
                    session_id,
                    export_path: export_path.display().to_string(),
                    timestamp: chrono::Utc::now(),
                });
                true
            }
            Err(e) => {
                tracing::warn!("Live session export failed (non-fatal): {}", e);
                false
            }
        };

    session.transition_to(SessionStatus::Completed);
    db::sessions::save_session(pool, &session)
        .await
        .map_err(ApiError::Common)?;

    bus.emit_lossy(ScopeEvent::LiveSessionSaved {
        session_id,
        entry_count: entries.len(),
        timestamp: chrono::Utc::now(),
    });

    Ok(SaveOutcome {
        session_id,
        findings_count: entries.len(),
        high_risk_count,
        export_available,
    })
}
