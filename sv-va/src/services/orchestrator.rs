//! Pipeline orchestration
//!
//! Runs the four stages for one session in order: sampling, analysis,
//! summary, export. The orchestrator owns the session state machine
//! transitions and persists after every change so status polling and
//! SSE always see current state. Export failures are logged and the
//! session completes anyway; everything else fatal marks the session
//! failed with the stage name.

use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use sv_common::events::{EventBus, ScopeEvent};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::db;
use crate::error::PipelineError;
use crate::models::{AnalysisSession, PipelineStage, SessionStatus};
use crate::services::{analyzer, exporter, frame_sampler, summarizer};
use crate::services::inference::InferenceEngine;
use crate::storage::FrameStore;

/// Progress sink shared with the stage functions
///
/// Maps stage-local completion fractions onto the session's overall
/// 0-100 progress, clamps so progress never moves backwards, persists
/// the value, and broadcasts it. Stages call this freely; late or
/// repeated updates are harmless.
#[derive(Clone)]
pub struct ProgressReporter {
    pool: SqlitePool,
    bus: EventBus,
    session_id: Uuid,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(pool: SqlitePool, bus: EventBus, session_id: Uuid, start: u8) -> Self {
        Self {
            pool,
            bus,
            session_id,
            last: Arc::new(AtomicU8::new(start)),
        }
    }

    pub fn current(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }

    pub async fn report(&self, stage: PipelineStage, fraction: f64, message: impl Into<String>) {
        let progress = stage.progress_at(fraction);
        let previous = self.last.fetch_max(progress, Ordering::Relaxed);
        if progress <= previous {
            return;
        }

        let result = sqlx::query("UPDATE sessions SET progress = ? WHERE id = ?")
            .bind(progress as i64)
            .bind(self.session_id.to_string())
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            tracing::warn!("Failed to persist progress for {}: {}", self.session_id, e);
        }

        self.bus.emit_lossy(ScopeEvent::ProgressUpdate {
            session_id: self.session_id,
            progress,
            stage: stage.name().to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Drives one session through the full pipeline
pub struct PipelineOrchestrator {
    pool: SqlitePool,
    store: FrameStore,
    bus: EventBus,
    engine: Arc<dyn InferenceEngine>,
    config: ServiceConfig,
    /// Shared with `/health` so the last pipeline failure stays visible
    last_error: Arc<RwLock<Option<String>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        pool: SqlitePool,
        store: FrameStore,
        bus: EventBus,
        engine: Arc<dyn InferenceEngine>,
        config: ServiceConfig,
        last_error: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            pool,
            store,
            bus,
            engine,
            config,
            last_error,
        }
    }

    /// Process a queued session end to end
    ///
    /// Never returns an error: every failure path ends with the
    /// session marked failed in the database.
    pub async fn process_session(&self, session_id: Uuid) {
        let session = match db::sessions::load_session(&self.pool, session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::warn!("Queued session {} no longer exists", session_id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load queued session {}: {}", session_id, e);
                return;
            }
        };

        if session.is_terminal() {
            tracing::warn!(
                "Skipping session {} already in terminal state {:?}",
                session_id,
                session.status
            );
            return;
        }

        let mut session = session;
        session.transition_to(SessionStatus::Processing);
        if let Err(e) = db::sessions::save_session(&self.pool, &session).await {
            tracing::error!("Failed to mark session {} processing: {}", session_id, e);
            return;
        }
        self.bus.emit_lossy(ScopeEvent::ProcessingStarted {
            session_id,
            timestamp: chrono::Utc::now(),
        });

        match self.run_stages(&mut session).await {
            Ok(()) => {
                session.transition_to(SessionStatus::Completed);
                if let Err(e) = db::sessions::save_session(&self.pool, &session).await {
                    tracing::error!("Failed to save completed session {}: {}", session_id, e);
                }
                self.bus.emit_lossy(ScopeEvent::SessionCompleted {
                    session_id,
                    total_frames: session.frame_count.unwrap_or(0),
                    timestamp: chrono::Utc::now(),
                });
                tracing::info!("Session {} completed", session_id);
            }
            Err((stage, message)) => {
                tracing::error!("Session {} failed at {}: {}", session_id, stage.name(), message);
                *self.last_error.write().await =
                    Some(format!("session {} failed at {}: {}", session_id, stage.name(), message));
                session.mark_failed(stage, &message);
                if db::sessions::save_session(&self.pool, &session).await.is_err() {
                    // Direct fallback so the session never looks alive forever
                    let _ = db::sessions::mark_session_failed(
                        &self.pool,
                        session_id,
                        stage.name(),
                        &message,
                    )
                    .await;
                }
                self.bus.emit_lossy(ScopeEvent::SessionFailed {
                    session_id,
                    stage: stage.name().to_string(),
                    message,
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    async fn run_stages(
        &self,
        session: &mut AnalysisSession,
    ) -> Result<(), (PipelineStage, String)> {
        let reporter = ProgressReporter::new(
            self.pool.clone(),
            self.bus.clone(),
            session.id,
            session.progress,
        );

        // Stage 1: sampling
        let video_path = session
            .video_path
            .clone()
            .ok_or((PipelineStage::Sampling, "no source video".to_string()))?;
        let outcome = frame_sampler::sample_video(
            &self.pool,
            &self.store,
            session.id,
            Path::new(&video_path),
            self.config.target_fps,
            self.config.probe_timeout_secs,
            &reporter,
        )
        .await
        .map_err(|e| (PipelineStage::Sampling, e.to_string()))?;

        session.video = outcome.metadata;
        session.frame_count = Some(
            db::frames::count_frames(&self.pool, session.id)
                .await
                .map_err(|e| (PipelineStage::Sampling, e.to_string()))?,
        );
        session.advance_progress(reporter.current());
        db::sessions::save_session(&self.pool, session)
            .await
            .map_err(|e| (PipelineStage::Sampling, e.to_string()))?;

        // Stage 2: analysis
        analyzer::analyze_session(
            &self.pool,
            &self.store,
            self.engine.as_ref(),
            session.id,
            self.config.batch_size,
            self.config.inference_timeout_secs,
            &self.bus,
            &reporter,
        )
        .await
        .map_err(|e| (PipelineStage::Analysis, e.to_string()))?;

        // Stage 3: summary
        summarizer::generate_summary(&self.pool, session.id, &reporter)
            .await
            .map_err(|e| (PipelineStage::Summary, e.to_string()))?;

        // Stage 4: export (non-fatal)
        match exporter::export_session(&self.pool, &self.store, session, true, &reporter).await {
            Ok(export_path) => {
                session.export_path = Some(export_path.display().to_string());
                // The reporter has already persisted the export band;
                // catch the in-memory copy up before writing it back or
                // this save would roll the stored progress down again.
                session.advance_progress(reporter.current());
                db::sessions::save_session(&self.pool, session)
                    .await
                    .map_err(|e| (PipelineStage::Export, e.to_string()))?;
                self.bus.emit_lossy(ScopeEvent::ExportReady {
                    session_id: session.id,
                    export_path: export_path.display().to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Export failed for session {} (session still completes): {}",
                    session.id,
                    e
                );
            }
        }

        session.advance_progress(reporter.current());
        Ok(())
    }
}
