//! Summary assembly stage
//!
//! Builds the per-session summary from persisted findings: notable
//! findings deduplicated and capped, plus a fixed-template narrative.
//! Running it again over the same findings produces the same content,
//! and the UPSERT replaces the stored row in place.

use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap, HashSet};
use sv_common::events::RiskLevel;
use uuid::Uuid;

use crate::db;
use crate::error::PipelineError;
use crate::models::{Finding, KeyFinding, PipelineStage, SessionSummary};
use crate::services::orchestrator::ProgressReporter;

/// Most notable findings kept in a summary
const KEY_FINDINGS_CAP: usize = 10;

/// Finding prefix length used for deduplication
const DEDUPE_PREFIX_CHARS: usize = 50;

/// Select notable findings: medium and high risk, deduplicated by
/// location plus finding prefix, first occurrence wins, capped
pub fn select_key_findings(
    findings: &[Finding],
    timestamps: &HashMap<Uuid, String>,
) -> Vec<KeyFinding> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut selected = Vec::new();

    for finding in findings {
        if finding.risk_level == RiskLevel::Low {
            continue;
        }

        let prefix: String = finding
            .finding
            .to_lowercase()
            .chars()
            .take(DEDUPE_PREFIX_CHARS)
            .collect();
        let key = (finding.location.to_lowercase(), prefix);
        if !seen.insert(key) {
            continue;
        }

        selected.push(KeyFinding {
            timestamp: timestamps
                .get(&finding.frame_id)
                .cloned()
                .unwrap_or_default(),
            location: finding.location.clone(),
            finding: finding.finding.clone(),
            risk_level: finding.risk_level,
            confidence: finding.confidence,
        });

        if selected.len() >= KEY_FINDINGS_CAP {
            break;
        }
    }

    selected
}

/// Render the narrative summary text
pub fn render_summary_text(
    total_analyzed: i64,
    high_count: i64,
    medium_count: i64,
    locations: &BTreeSet<String>,
    key_findings: &[KeyFinding],
) -> String {
    let mut text = format!(
        "Procedure Analysis Summary\n\
         \n\
         Frames Analyzed: {}\n\
         High Risk Findings: {}\n\
         Medium Risk Findings: {}\n\
         Distinct Locations Noted: {}\n",
        total_analyzed,
        high_count,
        medium_count,
        locations.len(),
    );

    if !locations.is_empty() {
        let list: Vec<&str> = locations.iter().map(|s| s.as_str()).collect();
        text.push_str(&format!("Locations: {}\n", list.join(", ")));
    }

    text.push_str("\nNotable Findings:\n");
    if key_findings.is_empty() {
        text.push_str("- No medium or high risk findings recorded\n");
    } else {
        for kf in key_findings {
            text.push_str(&format!(
                "- [{}] {} - {} ({} risk)\n",
                kf.timestamp,
                kf.location,
                kf.finding,
                kf.risk_level.as_str()
            ));
        }
    }

    text.push_str(
        "\nThis is an AI-generated educational summary. All findings require \
         interpretation by a qualified physician and do not constitute a diagnosis.\n",
    );

    text
}

/// Build and persist the summary for a session
pub async fn generate_summary(
    pool: &SqlitePool,
    session_id: Uuid,
    reporter: &ProgressReporter,
) -> Result<SessionSummary, PipelineError> {
    let findings = db::findings::list_findings(pool, session_id).await?;
    let frames = db::frames::list_frames(pool, session_id, 0, i64::MAX).await?;

    let timestamps: HashMap<Uuid, String> = frames
        .into_iter()
        .map(|f| (f.id, f.timestamp_formatted))
        .collect();

    let total_analyzed = findings.len() as i64;
    let high_count = findings
        .iter()
        .filter(|f| f.risk_level == RiskLevel::High)
        .count() as i64;
    let medium_count = findings
        .iter()
        .filter(|f| f.risk_level == RiskLevel::Medium)
        .count() as i64;

    let locations: BTreeSet<String> = findings
        .iter()
        .map(|f| f.location.trim())
        .filter(|loc| !loc.is_empty() && !loc.eq_ignore_ascii_case("unknown"))
        .map(|loc| loc.to_string())
        .collect();

    let key_findings = select_key_findings(&findings, &timestamps);
    let overall_summary = render_summary_text(
        total_analyzed,
        high_count,
        medium_count,
        &locations,
        &key_findings,
    );

    let summary = SessionSummary {
        id: Uuid::new_v4(),
        session_id,
        overall_summary,
        key_findings,
        total_analyzed,
        high_risk_count: high_count,
        generated_at: chrono::Utc::now(),
    };

    db::summaries::save_summary(pool, &summary).await?;

    reporter
        .report(
            PipelineStage::Summary,
            1.0,
            format!("Summary generated ({} notable findings)", summary.key_findings.len()),
        )
        .await;

    Ok(summary)
}
