//! Session API
//!
//! Registration, status polling, frame/summary/export retrieval, and
//! lifecycle operations for recorded-video sessions.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sv_common::events::ScopeEvent;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::SessionStatus;
use crate::services::jobs::Job;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub video_path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_procedure_type")]
    pub procedure_type: String,
}

fn default_procedure_type() -> String {
    "other".to_string()
}

#[derive(Debug, Deserialize)]
pub struct FramesQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_frames_limit")]
    pub limit: i64,
}

fn default_frames_limit() -> i64 {
    100
}

/// POST /sessions - register a recorded video and queue it
///
/// Refused with 409 while another session is queued or running; the
/// pipeline processes one session at a time.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.video_path.trim().is_empty() {
        return Err(ApiError::BadRequest("video_path is required".to_string()));
    }
    if !std::path::Path::new(&request.video_path).exists() {
        return Err(ApiError::BadRequest(format!(
            "video not found: {}",
            request.video_path
        )));
    }

    if db::sessions::has_active_session(&state.db).await? {
        return Err(ApiError::Conflict(
            "A session is already queued or processing".to_string(),
        ));
    }

    let title = request
        .title
        .unwrap_or_else(|| format!("Session {}", chrono::Utc::now().format("%Y-%m-%d %H:%M")));
    let session = crate::models::AnalysisSession::new_recorded(
        title,
        request.procedure_type,
        request.video_path,
    );
    db::sessions::save_session(&state.db, &session).await?;

    state
        .jobs
        .try_enqueue(Job::ProcessSession {
            session_id: session.id,
        })
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    state.event_bus.emit_lossy(ScopeEvent::SessionQueued {
        session_id: session.id,
        timestamp: chrono::Utc::now(),
    });

    tracing::info!("Session {} queued for processing", session.id);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "session_id": session.id,
            "status": session.status,
        })),
    ))
}

/// GET /sessions - all sessions, newest first
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sessions = db::sessions::list_sessions(&state.db).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let session = db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;
    Ok(Json(session))
}

/// GET /sessions/:id/status - lightweight polling endpoint
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let session = db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    Ok(Json(json!({
        "session_id": session.id,
        "status": session.status,
        "progress": session.progress,
        "frame_count": session.frame_count,
        "error": session.error,
    })))
}

/// GET /sessions/:id/frames?skip&limit
pub async fn get_frames(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<FramesQuery>,
) -> ApiResult<impl IntoResponse> {
    if db::sessions::load_session(&state.db, session_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("session {}", session_id)));
    }

    let limit = query.limit.clamp(1, 1000);
    let skip = query.skip.max(0);
    let frames = db::frames::list_frames(&state.db, session_id, skip, limit).await?;
    let total = db::frames::count_frames(&state.db, session_id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "total": total,
        "skip": skip,
        "limit": limit,
        "frames": frames,
    })))
}

/// GET /sessions/:id/summary
pub async fn get_summary(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let summary = db::summaries::load_summary(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no summary for session {}", session_id)))?;
    Ok(Json(summary))
}

/// GET /sessions/:id/export - download the latest export bundle
pub async fn download_export(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Response> {
    let session = db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    let export_path = session
        .export_path
        .ok_or_else(|| ApiError::NotFound(format!("no export for session {}", session_id)))?;

    let bytes = tokio::fs::read(&export_path).await.map_err(|e| {
        ApiError::NotFound(format!("export bundle unavailable ({}): {}", export_path, e))
    })?;

    let filename = std::path::Path::new(&export_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("export.zip")
        .to_string();

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /sessions/:id - remove the session, its rows, and its frames
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if db::sessions::load_session(&state.db, session_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("session {}", session_id)));
    }

    db::sessions::delete_session_cascade(&state.db, session_id).await?;
    if let Err(e) = state.store.purge_session(session_id) {
        tracing::warn!("Could not purge frame storage for {}: {}", session_id, e);
    }

    tracing::info!("Session {} deleted", session_id);
    Ok(Json(json!({ "status": "deleted", "session_id": session_id })))
}

/// POST /sessions/:id/reset - return a failed or stuck session to
/// pending and queue it again
///
/// The escape hatch for sessions orphaned in `processing` by a dead
/// worker, and the only way out of a terminal state. Frames already
/// analyzed keep their findings; the re-run resumes from the rest.
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let session = db::sessions::load_session(&state.db, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {}", session_id)))?;

    if session.status == SessionStatus::Pending {
        return Err(ApiError::BadRequest(
            "session is already pending".to_string(),
        ));
    }

    db::sessions::reset_session(&state.db, session_id).await?;

    state
        .jobs
        .try_enqueue(Job::ProcessSession { session_id })
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    state.event_bus.emit_lossy(ScopeEvent::SessionQueued {
        session_id,
        timestamp: chrono::Utc::now(),
    });

    tracing::info!("Session {} reset and requeued", session_id);
    Ok(Json(json!({ "status": "pending", "session_id": session_id })))
}

/// Build session routes
pub fn sessions_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/status", get(get_status))
        .route("/sessions/:id/frames", get(get_frames))
        .route("/sessions/:id/summary", get(get_summary))
        .route("/sessions/:id/export", get(download_export))
        .route("/sessions/:id/reset", post(reset_session))
}
