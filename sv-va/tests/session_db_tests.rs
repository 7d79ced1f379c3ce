//! Session persistence tests
//!
//! Round-trips, the single-active-session guard, failure marking, the
//! pending reset, and cascading deletion against an in-memory database.

use sv_va::db;
use sv_va::models::{AnalysisSession, Finding, FrameRecord, SessionKind, SessionStatus};
use uuid::Uuid;

fn recorded_session() -> AnalysisSession {
    AnalysisSession::new_recorded(
        "Morning colonoscopy".to_string(),
        "colonoscopy".to_string(),
        "/videos/case-017.mp4".to_string(),
    )
}

/// TC-DB-001: Save and load preserve the session
#[tokio::test]
async fn tc_db_001_session_round_trip() {
    let pool = db::init_memory_pool().await.unwrap();

    let mut session = recorded_session();
    session.video.duration_seconds = Some(1830.5);
    session.video.fps = Some(29.97);
    session.video.width = Some(1920);
    session.video.height = Some(1080);
    session.frame_count = Some(1830);

    db::sessions::save_session(&pool, &session).await.unwrap();
    let loaded = db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.kind, SessionKind::Recorded);
    assert_eq!(loaded.status, SessionStatus::Pending);
    assert_eq!(loaded.title, "Morning colonoscopy");
    assert_eq!(loaded.video_path.as_deref(), Some("/videos/case-017.mp4"));
    assert_eq!(loaded.video.fps, Some(29.97));
    assert_eq!(loaded.video.width, Some(1920));
    assert_eq!(loaded.frame_count, Some(1830));
}

/// TC-DB-002: Saving the same id twice updates in place
#[tokio::test]
async fn tc_db_002_save_is_upsert() {
    let pool = db::init_memory_pool().await.unwrap();

    let mut session = recorded_session();
    db::sessions::save_session(&pool, &session).await.unwrap();

    session.transition_to(SessionStatus::Processing);
    session.advance_progress(42);
    db::sessions::save_session(&pool, &session).await.unwrap();

    let loaded = db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, SessionStatus::Processing);
    assert_eq!(loaded.progress, 42);
    assert!(loaded.started_at.is_some());

    let all = db::sessions::list_sessions(&pool).await.unwrap();
    assert_eq!(all.len(), 1);
}

/// TC-DB-003: Active-session guard sees pending and processing only
#[tokio::test]
async fn tc_db_003_active_session_guard() {
    let pool = db::init_memory_pool().await.unwrap();
    assert!(!db::sessions::has_active_session(&pool).await.unwrap());

    let mut session = recorded_session();
    db::sessions::save_session(&pool, &session).await.unwrap();
    assert!(db::sessions::has_active_session(&pool).await.unwrap());

    session.transition_to(SessionStatus::Processing);
    db::sessions::save_session(&pool, &session).await.unwrap();
    assert!(db::sessions::has_active_session(&pool).await.unwrap());

    session.transition_to(SessionStatus::Completed);
    db::sessions::save_session(&pool, &session).await.unwrap();
    assert!(!db::sessions::has_active_session(&pool).await.unwrap());

    // A failed session does not block new work either
    let mut failed = recorded_session();
    failed.mark_failed(sv_va::models::PipelineStage::Sampling, "boom");
    db::sessions::save_session(&pool, &failed).await.unwrap();
    assert!(!db::sessions::has_active_session(&pool).await.unwrap());
}

/// TC-DB-004: Direct failure marking works without a loaded session
#[tokio::test]
async fn tc_db_004_mark_session_failed() {
    let pool = db::init_memory_pool().await.unwrap();
    let session = recorded_session();
    db::sessions::save_session(&pool, &session).await.unwrap();

    db::sessions::mark_session_failed(&pool, session.id, "analysis", "db connection lost")
        .await
        .unwrap();

    let loaded = db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, SessionStatus::Failed);
    assert_eq!(loaded.error.as_deref(), Some("analysis: db connection lost"));
    assert!(loaded.completed_at.is_some());
}

/// TC-DB-005: Reset returns a failed session to a clean pending state
#[tokio::test]
async fn tc_db_005_reset_clears_error_and_progress() {
    let pool = db::init_memory_pool().await.unwrap();
    let mut session = recorded_session();
    session.transition_to(SessionStatus::Processing);
    session.advance_progress(55);
    session.mark_failed(sv_va::models::PipelineStage::Analysis, "timeout");
    db::sessions::save_session(&pool, &session).await.unwrap();

    db::sessions::reset_session(&pool, session.id).await.unwrap();

    let loaded = db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, SessionStatus::Pending);
    assert_eq!(loaded.progress, 0);
    assert!(loaded.error.is_none());
    assert!(loaded.completed_at.is_none());
}

/// TC-DB-006: Deletion removes frames, findings, and summaries with the
/// session
#[tokio::test]
async fn tc_db_006_delete_cascades() {
    let pool = db::init_memory_pool().await.unwrap();
    let session = recorded_session();
    db::sessions::save_session(&pool, &session).await.unwrap();

    let frame = FrameRecord::new(session.id, 0, 0, "/tmp/f0.jpg".to_string(), false);
    db::frames::insert_frames(&pool, std::slice::from_ref(&frame))
        .await
        .unwrap();

    let finding = Finding::placeholder(
        frame.id,
        session.id,
        "raw".to_string(),
        10,
        "test-model".to_string(),
    );
    db::findings::insert_finding(&pool, &finding).await.unwrap();

    db::sessions::delete_session_cascade(&pool, session.id)
        .await
        .unwrap();

    assert!(db::sessions::load_session(&pool, session.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(db::frames::count_frames(&pool, session.id).await.unwrap(), 0);
    assert_eq!(
        db::findings::count_findings(&pool, session.id).await.unwrap(),
        0
    );
}

/// TC-DB-007: Unknown ids load as None, not as errors
#[tokio::test]
async fn tc_db_007_missing_session_is_none() {
    let pool = db::init_memory_pool().await.unwrap();
    let loaded = db::sessions::load_session(&pool, Uuid::new_v4()).await.unwrap();
    assert!(loaded.is_none());
}
