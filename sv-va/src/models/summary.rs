//! Session summary records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sv_common::events::RiskLevel;
use uuid::Uuid;

/// One deduplicated notable finding in the session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    /// Media timestamp of the first frame showing this finding
    pub timestamp: String,
    pub location: String,
    pub finding: String,
    pub risk_level: RiskLevel,
    pub confidence: f64,
}

/// Per-session summary, regenerated in place on re-runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub overall_summary: String,
    pub key_findings: Vec<KeyFinding>,
    pub total_analyzed: i64,
    pub high_risk_count: i64,
    pub generated_at: DateTime<Utc>,
}
