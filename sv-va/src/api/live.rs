//! Live session API
//!
//! Snapshot analysis and clarification during an ongoing procedure,
//! plus timeline buffer management and the save path that persists a
//! live session.

use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use sv_common::events::ScopeEvent;

use crate::error::{ApiError, ApiResult};
use crate::live::timeline::TimelineEntry;
use crate::services::extractor::{self, Extraction};
use crate::services::inference::{clarify_prompt, ANALYSIS_PROMPT};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    /// Base64-encoded JPEG or PNG
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct ClarifyRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveLiveRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_procedure_type")]
    pub procedure_type: String,
    #[serde(default)]
    pub include_frames: bool,
}

fn default_procedure_type() -> String {
    "other".to_string()
}

/// POST /live/session/start - open a live session
///
/// Unconditionally replaces any previous buffer contents, saved or not.
pub async fn start_live_session(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    let session_id = {
        let mut timeline = state.timeline.lock().await;
        timeline.start()
    };

    state.event_bus.emit_lossy(ScopeEvent::LiveSessionStarted {
        session_id,
        timestamp: chrono::Utc::now(),
    });

    tracing::info!("Live session {} started", session_id);
    Ok(Json(json!({
        "session_id": session_id,
        "started_at": chrono::Utc::now(),
    })))
}

/// GET /live/session/current
pub async fn current_live_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let timeline = state.timeline.lock().await;
    Json(json!({
        "session_id": timeline.session_id(),
        "active": timeline.is_active(),
        "findings_count": timeline.len(),
    }))
}

/// POST /live/session/clear - discard the buffer without saving
pub async fn clear_live_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session_id = {
        let mut timeline = state.timeline.lock().await;
        let id = timeline.session_id();
        timeline.clear();
        id
    };

    if let Some(id) = session_id {
        state.event_bus.emit_lossy(ScopeEvent::LiveSessionCleared {
            timestamp: chrono::Utc::now(),
        });
        tracing::info!("Live session {} cleared", id);
    }

    Json(json!({ "status": "cleared" }))
}

/// GET /live/timeline - buffered findings in capture order
pub async fn get_timeline(State(state): State<AppState>) -> Json<serde_json::Value> {
    let timeline = state.timeline.lock().await;
    Json(json!({
        "session_id": timeline.session_id(),
        "entries": timeline.entries(),
    }))
}

/// POST /live/snapshot - analyze a single frame from the procedure feed
///
/// The snapshot is retained as the latest frame for clarifications and
/// for the saved session's frame images. A structured finding is
/// appended to the timeline when a live session is active; analysis
/// still runs (and returns its result) when none is.
pub async fn analyze_snapshot(
    State(state): State<AppState>,
    Json(request): Json<SnapshotRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(request.image.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 image: {}", e)))?;

    image::load_from_memory(&jpeg)
        .map_err(|e| ApiError::BadRequest(format!("undecodable image: {}", e)))?;

    {
        let mut timeline = state.timeline.lock().await;
        timeline.set_latest_snapshot(jpeg.clone());
    }

    let timeout = Duration::from_secs(state.config.inference_timeout_secs);
    let raw = tokio::time::timeout(timeout, state.engine.analyze(&jpeg, ANALYSIS_PROMPT))
        .await
        .map_err(|_| {
            ApiError::Internal(format!(
                "inference timed out after {}s",
                state.config.inference_timeout_secs
            ))
        })??;

    match extractor::extract(&raw) {
        Extraction::Finding(finding) => {
            let entry = TimelineEntry::new(finding, raw);

            let (appended, session_id) = {
                let mut timeline = state.timeline.lock().await;
                if timeline.is_active() {
                    timeline.add(entry.clone());
                    (true, timeline.session_id())
                } else {
                    (false, None)
                }
            };

            if let Some(id) = session_id {
                state.event_bus.emit_lossy(ScopeEvent::LiveFindingAdded {
                    session_id: id,
                    risk_level: entry.finding.risk_level,
                    finding: entry.finding.finding.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }

            Ok(Json(json!({
                "timestamp": entry.wall_clock,
                "finding": entry.finding,
                "appended": appended,
            })))
        }
        Extraction::Rejected => Ok(Json(json!({
            "result": "No significant findings detected",
        }))),
    }
}

/// POST /live/clarify - ask a follow-up question about the latest
/// snapshot
pub async fn clarify(
    State(state): State<AppState>,
    Json(request): Json<ClarifyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question is required".to_string()));
    }

    let snapshot = {
        let timeline = state.timeline.lock().await;
        timeline.latest_snapshot()
    };
    let jpeg = snapshot.ok_or_else(|| {
        ApiError::BadRequest("No snapshot captured yet. Send one to /live/snapshot first.".to_string())
    })?;

    let prompt = clarify_prompt(question);
    let timeout = Duration::from_secs(state.config.inference_timeout_secs);
    let raw = tokio::time::timeout(timeout, state.engine.analyze(&jpeg, &prompt))
        .await
        .map_err(|_| {
            ApiError::Internal(format!(
                "inference timed out after {}s",
                state.config.inference_timeout_secs
            ))
        })??;

    match extractor::extract_clarification(&raw) {
        Some(answer) => Ok(Json(json!({
            "clarification": answer.clarification,
            "confidence": answer.confidence,
            "suggested_action": answer.suggested_action,
        }))),
        // Unlabelled answers still go back to the clinician verbatim
        None => Ok(Json(json!({
            "clarification": extractor::clean_model_output(&raw),
            "confidence": "Unknown",
            "suggested_action": "",
        }))),
    }
}

/// POST /live/session/save - persist the buffer as a completed session
pub async fn save_live_session(
    State(state): State<AppState>,
    Json(request): Json<SaveLiveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (session_id, entries, snapshot) = {
        let timeline = state.timeline.lock().await;
        let id = timeline
            .session_id()
            .ok_or_else(|| ApiError::BadRequest("No active live session".to_string()))?;
        (id, timeline.entries().to_vec(), timeline.latest_snapshot())
    };

    let title = request
        .title
        .unwrap_or_else(|| format!("Live session {}", chrono::Utc::now().format("%Y-%m-%d %H:%M")));

    let outcome = crate::live::save_live_session(
        &state.db,
        &state.store,
        &state.event_bus,
        session_id,
        title,
        request.procedure_type,
        request.include_frames,
        &entries,
        snapshot,
    )
    .await?;

    {
        let mut timeline = state.timeline.lock().await;
        // The buffer may have been restarted while the save ran;
        // only clear it if it still belongs to the saved session.
        if timeline.session_id() == Some(session_id) {
            timeline.clear();
        }
    }

    tracing::info!(
        "Live session {} saved with {} findings",
        outcome.session_id,
        outcome.findings_count
    );

    Ok(Json(json!({
        "session_id": outcome.session_id,
        "findings_count": outcome.findings_count,
        "high_risk_count": outcome.high_risk_count,
        "export_available": outcome.export_available,
    })))
}

/// Build live session routes
pub fn live_routes() -> Router<AppState> {
    Router::new()
        .route("/live/session/start", post(start_live_session))
        .route("/live/session/save", post(save_live_session))
        .route("/live/session/clear", post(clear_live_session))
        .route("/live/session/current", get(current_live_session))
        .route("/live/snapshot", post(analyze_snapshot))
        .route("/live/clarify", post(clarify))
        .route("/live/timeline", get(get_timeline))
}
