//! Batch analysis stage
//!
//! Visits every unanalyzed frame for the session in index order and
//! produces exactly one finding per frame. Inference failures and
//! extraction rejections are absorbed frame-locally as the canonical
//! placeholder; only persistence failures abort the stage. Each batch
//! commits atomically and the engine cache is released between
//! batches.

use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use sv_common::events::{EventBus, ScopeEvent};
use uuid::Uuid;

use crate::db;
use crate::error::PipelineError;
use crate::models::{Finding, FrameRecord, PipelineStage};
use crate::services::extractor::{self, Extraction};
use crate::services::inference::{InferenceEngine, ANALYSIS_PROMPT};
use crate::services::orchestrator::ProgressReporter;
use crate::storage::FrameStore;

/// Analyze all pending frames for a session, returning how many were
/// processed in this run
#[allow(clippy::too_many_arguments)]
pub async fn analyze_session(
    pool: &SqlitePool,
    store: &FrameStore,
    engine: &dyn InferenceEngine,
    session_id: Uuid,
    batch_size: usize,
    inference_timeout_secs: u64,
    bus: &EventBus,
    reporter: &ProgressReporter,
) -> Result<i64, PipelineError> {
    let frames = db::frames::list_unanalyzed_frames(pool, session_id).await?;
    let total = frames.len();

    if total == 0 {
        reporter
            .report(PipelineStage::Analysis, 1.0, "No frames pending analysis")
            .await;
        return Ok(0);
    }

    tracing::info!(
        "Analyzing {} frames for session {} in batches of {}",
        total,
        session_id,
        batch_size
    );

    let mut done: usize = 0;
    for batch in frames.chunks(batch_size.max(1)) {
        let mut tx = pool.begin().await.map_err(sv_common::Error::Database)?;

        for frame in batch {
            let finding =
                analyze_frame(store, engine, frame, inference_timeout_secs).await;

            db::findings::insert_finding_tx(&mut tx, &finding).await?;
            db::frames::mark_analyzed_tx(&mut tx, frame.id).await?;

            bus.emit_lossy(ScopeEvent::FrameAnalyzed {
                session_id,
                frame_index: frame.frame_index,
                risk_level: finding.risk_level,
                timestamp: chrono::Utc::now(),
            });
        }

        tx.commit().await.map_err(sv_common::Error::Database)?;
        done += batch.len();

        // Accelerator cache release between batches
        engine.reset().await;

        reporter
            .report(
                PipelineStage::Analysis,
                done as f64 / total as f64,
                format!("Analyzed {}/{} frames", done, total),
            )
            .await;
    }

    Ok(done as i64)
}

/// Analyze one frame; never fails, the worst outcome is a placeholder
async fn analyze_frame(
    store: &FrameStore,
    engine: &dyn InferenceEngine,
    frame: &FrameRecord,
    inference_timeout_secs: u64,
) -> Finding {
    let model_name = engine.model_name().to_string();

    let jpeg = match store.load_frame_jpeg(&frame.image_path) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            tracing::warn!("Frame {} image unreadable: {}", frame.frame_index, e);
            return Finding::placeholder(
                frame.id,
                frame.session_id,
                format!("frame image unreadable: {}", e),
                0,
                model_name,
            );
        }
    };

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(inference_timeout_secs),
        engine.analyze(&jpeg, ANALYSIS_PROMPT),
    )
    .await;
    let elapsed_ms = started.elapsed().as_millis() as i64;

    let raw = match result {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            tracing::warn!("Inference failed for frame {}: {}", frame.frame_index, e);
            return Finding::placeholder(
                frame.id,
                frame.session_id,
                format!("inference error: {}", e),
                elapsed_ms,
                model_name,
            );
        }
        Err(_) => {
            tracing::warn!(
                "Inference timed out for frame {} after {}s",
                frame.frame_index,
                inference_timeout_secs
            );
            return Finding::placeholder(
                frame.id,
                frame.session_id,
                format!("inference timed out after {}s", inference_timeout_secs),
                elapsed_ms,
                model_name,
            );
        }
    };

    match extractor::extract(&raw) {
        Extraction::Finding(extracted) => Finding {
            id: Uuid::new_v4(),
            frame_id: frame.id,
            session_id: frame.session_id,
            finding: extracted.finding,
            location: extracted.location,
            risk_level: extracted.risk_level,
            confidence: extracted.confidence,
            suggested_action: extracted.suggested_action,
            detected_features: extracted.detected_features,
            raw_output: raw,
            inference_time_ms: elapsed_ms,
            model_name,
            created_at: chrono::Utc::now(),
        },
        Extraction::Rejected => {
            tracing::debug!(
                "Extraction rejected output for frame {}",
                frame.frame_index
            );
            Finding::placeholder(frame.id, frame.session_id, raw, elapsed_ms, model_name)
        }
    }
}
