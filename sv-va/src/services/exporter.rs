//! Export bundle stage
//!
//! Writes a zip bundle per session with fixed entry names:
//! `metadata.json`, `summary.json`, `findings.json`, `findings.csv`,
//! `report.txt`, and optionally a `frames/` directory of the sampled
//! JPEGs. Bundle filenames carry a timestamp, so re-exporting leaves
//! earlier bundles untouched and only the session's export reference
//! moves. Missing frame images are skipped with a warning, never
//! fatal.

use serde_json::json;
use sqlx::SqlitePool;
use std::io::Write;
use std::path::PathBuf;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::db;
use crate::error::PipelineError;
use crate::models::{AnalysisSession, Finding, FrameRecord, PipelineStage, SessionSummary};
use crate::services::orchestrator::ProgressReporter;
use crate::storage::FrameStore;

/// CSV field escaping: double quotes, flatten newlines
fn csv_field(value: &str) -> String {
    value.replace('"', "\"\"").replace('\n', " ")
}

fn render_findings_csv(findings: &[Finding], frames: &[FrameRecord]) -> String {
    let timestamps: std::collections::HashMap<_, _> = frames
        .iter()
        .map(|f| (f.id, f.timestamp_formatted.as_str()))
        .collect();

    let mut csv =
        String::from("Frame_Index,Timestamp,Finding,Location,Risk_Level,Confidence,Suggested_Action\n");
    for (idx, finding) in findings.iter().enumerate() {
        let ts = timestamps.get(&finding.frame_id).copied().unwrap_or("");
        csv.push_str(&format!(
            "{},\"{}\",\"{}\",\"{}\",\"{}\",{:.2},\"{}\"\n",
            idx,
            ts,
            csv_field(&finding.finding),
            csv_field(&finding.location),
            finding.risk_level.as_str(),
            finding.confidence,
            csv_field(&finding.suggested_action),
        ));
    }
    csv
}

fn render_report(
    session: &AnalysisSession,
    summary: &SessionSummary,
    findings: &[Finding],
    frames: &[FrameRecord],
    include_frames: bool,
) -> String {
    let timestamps: std::collections::HashMap<_, _> = frames
        .iter()
        .map(|f| (f.id, f.timestamp_formatted.as_str()))
        .collect();

    let rule = "=".repeat(80);
    let mut report = format!(
        "{rule}\nPROCEDURE ANALYSIS REPORT\n{rule}\n\n\
         Session ID: {}\n\
         Title: {}\n\
         Procedure Type: {}\n\
         Created: {}\n\
         Frames Analyzed: {}\n\n\
         {rule}\nSUMMARY\n{rule}\n\n{}\n\
         {rule}\nDETAILED FINDINGS\n{rule}\n",
        session.id,
        session.title,
        session.procedure_type,
        session.created_at.format("%Y-%m-%d %H:%M:%S"),
        summary.total_analyzed,
        summary.overall_summary,
    );

    for (idx, finding) in findings.iter().enumerate() {
        let ts = timestamps.get(&finding.frame_id).copied().unwrap_or("?");
        report.push_str(&format!(
            "\n--- Finding #{} ({}) ---\n\
             Finding: {}\n\
             Location: {}\n\
             Risk Level: {}\n\
             Suggested Action: {}\n",
            idx + 1,
            ts,
            finding.finding,
            finding.location,
            finding.risk_level.as_str(),
            finding.suggested_action,
        ));
    }

    report.push_str(&format!(
        "\n{rule}\nEXPORT CONTENTS\n{rule}\n\n\
         - metadata.json (session information)\n\
         - summary.json (analysis summary)\n\
         - findings.csv (spreadsheet-compatible findings)\n\
         - findings.json (detailed structured data)\n\
         - report.txt (this file)\n{}\n\
         Generated by ScopeView\nExport Date: {}\n",
        if include_frames {
            format!("- frames/ directory ({} JPEG images)\n", frames.len())
        } else {
            String::new()
        },
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
    ));

    report
}

/// Write the export bundle for a session, returning its path
pub async fn export_session(
    pool: &SqlitePool,
    store: &FrameStore,
    session: &AnalysisSession,
    include_frames: bool,
    reporter: &ProgressReporter,
) -> Result<PathBuf, PipelineError> {
    let summary = db::summaries::load_summary(pool, session.id)
        .await?
        .ok_or_else(|| PipelineError::Export("no summary to export".to_string()))?;
    let findings = db::findings::list_findings(pool, session.id).await?;
    let frames = db::frames::list_frames(pool, session.id, 0, i64::MAX).await?;

    let metadata = json!({
        "session_id": session.id,
        "title": session.title,
        "procedure_type": session.procedure_type,
        "session_kind": session.kind,
        "created_at": session.created_at.to_rfc3339(),
        "duration_seconds": session.video.duration_seconds,
        "fps": session.video.fps,
        "total_findings": findings.len(),
        "high_risk_findings": summary.high_risk_count,
        "frames_included": include_frames,
        "frame_count": frames.len(),
        "export_generated_at": chrono::Utc::now().to_rfc3339(),
    });

    let summary_json = json!({
        "overall_summary": summary.overall_summary,
        "key_findings": summary.key_findings,
        "total_analyzed": summary.total_analyzed,
        "high_risk_count": summary.high_risk_count,
        "generated_at": summary.generated_at.to_rfc3339(),
    });

    let findings_json = serde_json::to_string_pretty(&findings)
        .map_err(|e| PipelineError::Export(format!("findings serialization failed: {}", e)))?;
    let metadata_json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| PipelineError::Export(format!("metadata serialization failed: {}", e)))?;
    let summary_json = serde_json::to_string_pretty(&summary_json)
        .map_err(|e| PipelineError::Export(format!("summary serialization failed: {}", e)))?;
    let csv = render_findings_csv(&findings, &frames);
    let report = render_report(session, &summary, &findings, &frames, include_frames);

    let zip_path = store.new_export_path(session.id);
    let frame_files: Vec<(String, String)> = if include_frames {
        frames
            .iter()
            .map(|f| {
                (
                    f.image_path.clone(),
                    format!("frames/{}", FrameStore::frame_file_name(f.frame_index)),
                )
            })
            .collect()
    } else {
        Vec::new()
    };

    // Zip writing is blocking I/O; keep it off the async runtime
    let written_path = zip_path.clone();
    tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
        let file = std::fs::File::create(&written_path)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("metadata.json", options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        zip.write_all(metadata_json.as_bytes())?;

        zip.start_file("summary.json", options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        zip.write_all(summary_json.as_bytes())?;

        zip.start_file("findings.csv", options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        zip.write_all(csv.as_bytes())?;

        zip.start_file("findings.json", options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        zip.write_all(findings_json.as_bytes())?;

        zip.start_file("report.txt", options)
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        zip.write_all(report.as_bytes())?;

        for (source, entry_name) in frame_files {
            match std::fs::read(&source) {
                Ok(bytes) => {
                    zip.start_file(&entry_name, options)
                        .map_err(|e| PipelineError::Export(e.to_string()))?;
                    zip.write_all(&bytes)?;
                }
                Err(e) => {
                    tracing::warn!("Skipping frame image {} in export: {}", source, e);
                }
            }
        }

        zip.finish()
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Export(format!("export task panicked: {}", e)))??;

    reporter
        .report(
            PipelineStage::Export,
            1.0,
            format!("Export bundle written: {}", zip_path.display()),
        )
        .await;

    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_common::events::RiskLevel;
    use uuid::Uuid;

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "say \"\"hi\"\"");
        assert_eq!(csv_field("two\nlines"), "two lines");
    }

    #[test]
    fn test_csv_rows_align_with_findings() {
        let session_id = Uuid::new_v4();
        let frame = FrameRecord::new(session_id, 0, 1000, "/tmp/f.jpg".into(), false);
        let finding = Finding {
            id: Uuid::new_v4(),
            frame_id: frame.id,
            session_id,
            finding: "Mild erythema".to_string(),
            location: "Antrum".to_string(),
            risk_level: RiskLevel::Medium,
            confidence: 0.80,
            suggested_action: "Biopsy".to_string(),
            detected_features: vec!["erythema".to_string()],
            raw_output: String::new(),
            inference_time_ms: 50,
            model_name: "test".to_string(),
            created_at: chrono::Utc::now(),
        };

        let csv = render_findings_csv(&[finding], &[frame]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Frame_Index,Timestamp,Finding"));
        assert!(lines[1].contains("\"00:00:01.000\""));
        assert!(lines[1].contains("\"Mild erythema\""));
        assert!(lines[1].contains("\"medium\""));
    }
}
