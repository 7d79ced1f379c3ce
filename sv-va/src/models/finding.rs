//! Frame and finding records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sv_common::events::RiskLevel;
use uuid::Uuid;

/// A sampled frame persisted to disk and the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub id: Uuid,
    pub session_id: Uuid,

    /// Sequential index among sampled frames, from 0
    pub frame_index: i64,

    /// Media position in milliseconds
    pub timestamp_ms: i64,

    /// Media position rendered as `HH:MM:SS.mmm`
    pub timestamp_formatted: String,

    /// Path of the persisted JPEG under the frame store
    pub image_path: String,

    /// High-contrast, well-exposed frame per the luma heuristic
    pub is_keyframe: bool,

    /// Set once the analysis stage has a finding for this frame
    pub analyzed: bool,
}

impl FrameRecord {
    pub fn new(
        session_id: Uuid,
        frame_index: i64,
        timestamp_ms: i64,
        image_path: String,
        is_keyframe: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            frame_index,
            timestamp_ms,
            timestamp_formatted: sv_common::time::format_media_timestamp(timestamp_ms as u64),
            image_path,
            is_keyframe,
            analyzed: false,
        }
    }
}

/// Structured finding for one analyzed frame
///
/// Every analyzed frame has exactly one finding row; frames whose model
/// output was rejected carry the canonical placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub frame_id: Uuid,
    pub session_id: Uuid,

    pub finding: String,
    pub location: String,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub suggested_action: String,

    /// Anatomy/pathology keywords spotted in the raw model text
    pub detected_features: Vec<String>,

    /// Unmodified model output, kept for audit
    pub raw_output: String,

    pub inference_time_ms: i64,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Canonical placeholder recorded when extraction rejects the model
    /// output or inference fails outright.
    pub fn placeholder(
        frame_id: Uuid,
        session_id: Uuid,
        raw_output: String,
        inference_time_ms: i64,
        model_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            frame_id,
            session_id,
            finding: "No abnormal finding".to_string(),
            location: "Unknown".to_string(),
            risk_level: RiskLevel::Low,
            confidence: RiskLevel::Low.default_confidence(),
            suggested_action: "Continue inspection".to_string(),
            detected_features: Vec::new(),
            raw_output,
            inference_time_ms,
            model_name,
            created_at: Utc::now(),
        }
    }
}
