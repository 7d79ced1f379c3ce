//! Analysis session state machine
//!
//! A session progresses `pending → processing → completed | failed`.
//! Completed and failed are sinks: once terminal, a session only leaves
//! that state through an explicit reset back to pending. Progress is a
//! 0-100 integer that never decreases while the session runs; each
//! pipeline stage owns a fixed band of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Registered, waiting for the pipeline worker
    Pending,
    /// Pipeline running (sampling through export)
    Processing,
    /// Pipeline finished; findings and summary available
    Completed,
    /// Pipeline aborted; `error` names the failed stage
    Failed,
}

/// How the session's material was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Uploaded or server-local recording, processed by the pipeline
    Recorded,
    /// Persisted from the live timeline buffer
    Live,
}

/// Pipeline stages and their progress bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Sampling,
    Analysis,
    Summary,
    Export,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Sampling => "sampling",
            PipelineStage::Analysis => "analysis",
            PipelineStage::Summary => "summary",
            PipelineStage::Export => "export",
        }
    }

    /// Inclusive progress band owned by this stage
    pub fn band(&self) -> (u8, u8) {
        match self {
            PipelineStage::Sampling => (0, 30),
            PipelineStage::Analysis => (30, 80),
            PipelineStage::Summary => (80, 90),
            PipelineStage::Export => (90, 100),
        }
    }

    /// Map a completion fraction within this stage to overall progress
    pub fn progress_at(&self, fraction: f64) -> u8 {
        let (lo, hi) = self.band();
        let f = fraction.clamp(0.0, 1.0);
        (lo as f64 + f * (hi - lo) as f64).round() as u8
    }
}

/// State transition record, emitted alongside status changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub session_id: Uuid,
    pub old_status: SessionStatus,
    pub new_status: SessionStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Source video metadata captured at probe time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_seconds: Option<f64>,
    pub fps: Option<f64>,
    pub size_bytes: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Analysis session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub kind: SessionKind,
    pub status: SessionStatus,

    /// Overall progress 0-100, monotone while processing
    pub progress: u8,

    pub title: String,
    pub procedure_type: String,

    /// Server-visible path to the source recording (None for live sessions)
    pub video_path: Option<String>,
    pub video: VideoMetadata,

    /// Sampled frame count, set once sampling completes
    pub frame_count: Option<i64>,

    /// Latest export bundle path, if any
    pub export_path: Option<String>,

    /// Name of the failed stage plus a short message, for failed sessions
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisSession {
    /// Register a recorded video for processing
    pub fn new_recorded(title: String, procedure_type: String, video_path: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: SessionKind::Recorded,
            status: SessionStatus::Pending,
            progress: 0,
            title,
            procedure_type,
            video_path: Some(video_path),
            video: VideoMetadata::default(),
            frame_count: None,
            export_path: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a session shell for a persisted live timeline
    pub fn new_live(title: String, procedure_type: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: SessionKind::Live,
            status: SessionStatus::Pending,
            progress: 0,
            title,
            procedure_type,
            video_path: None,
            video: VideoMetadata::default(),
            frame_count: None,
            export_path: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to a new status, stamping start/end times
    pub fn transition_to(&mut self, new_status: SessionStatus) -> StatusTransition {
        let transition = StatusTransition {
            session_id: self.id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;

        match new_status {
            SessionStatus::Processing => {
                self.started_at = Some(Utc::now());
            }
            SessionStatus::Completed => {
                self.completed_at = Some(Utc::now());
                self.progress = 100;
            }
            SessionStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            SessionStatus::Pending => {}
        }

        transition
    }

    /// Advance progress, clamping so it never decreases
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    /// Record the failed stage; progress is left where it stopped
    pub fn mark_failed(&mut self, stage: PipelineStage, message: &str) -> StatusTransition {
        self.error = Some(format!("{}: {}", stage.name(), message));
        self.transition_to(SessionStatus::Failed)
    }

    /// Check whether the session is in a sink state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Failed
        )
    }
}
