//! Live timeline buffer
//!
//! Accumulates findings produced from snapshot analysis during a live
//! procedure. The buffer is owned by application state behind a mutex;
//! handlers lock it briefly to mutate and clone out what they need.
//! Starting a session replaces whatever was buffered, saving persists
//! the entries as a session, clearing discards them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::services::extractor::ExtractedFinding;

/// One buffered live finding
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    /// Wall-clock capture time, rendered `HH:MM:SS`
    pub wall_clock: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub finding: FindingView,
    #[serde(skip)]
    pub raw_output: String,
}

/// Serializable view of an extracted finding
#[derive(Debug, Clone, Serialize)]
pub struct FindingView {
    pub finding: String,
    pub location: String,
    pub risk_level: sv_common::events::RiskLevel,
    pub confidence: f64,
    pub suggested_action: String,
    pub detected_features: Vec<String>,
}

impl From<ExtractedFinding> for FindingView {
    fn from(f: ExtractedFinding) -> Self {
        Self {
            finding: f.finding,
            location: f.location,
            risk_level: f.risk_level,
            confidence: f.confidence,
            suggested_action: f.suggested_action,
            detected_features: f.detected_features,
        }
    }
}

impl TimelineEntry {
    pub fn new(finding: ExtractedFinding, raw_output: String) -> Self {
        let now = Utc::now();
        Self {
            wall_clock: sv_common::time::format_wall_clock(now),
            recorded_at: now,
            finding: finding.into(),
            raw_output,
        }
    }
}

/// In-memory live session state
#[derive(Debug, Default)]
pub struct TimelineBuffer {
    session_id: Option<Uuid>,
    entries: Vec<TimelineEntry>,
    latest_snapshot: Option<Vec<u8>>,
}

impl TimelineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new live session, discarding any buffered state
    /// unconditionally
    pub fn start(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.session_id = Some(id);
        self.entries.clear();
        self.latest_snapshot = None;
        id
    }

    /// Discard everything and close the session
    pub fn clear(&mut self) {
        self.session_id = None;
        self.entries.clear();
        self.latest_snapshot = None;
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn add(&mut self, entry: TimelineEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_latest_snapshot(&mut self, jpeg: Vec<u8>) {
        self.latest_snapshot = Some(jpeg);
    }

    pub fn latest_snapshot(&self) -> Option<Vec<u8>> {
        self.latest_snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_common::events::RiskLevel;

    fn entry(text: &str) -> TimelineEntry {
        TimelineEntry::new(
            ExtractedFinding {
                finding: text.to_string(),
                location: "Antrum".to_string(),
                risk_level: RiskLevel::Low,
                confidence: 0.75,
                suggested_action: "Continue".to_string(),
                detected_features: Vec::new(),
                structured: true,
            },
            "raw".to_string(),
        )
    }

    #[test]
    fn test_start_replaces_previous_session() {
        let mut buffer = TimelineBuffer::new();
        let first = buffer.start();
        buffer.add(entry("one"));
        buffer.add(entry("two"));
        assert_eq!(buffer.len(), 2);

        // Starting again swaps the id and drops buffered entries, even
        // though the previous session was never saved
        let second = buffer.start();
        assert_ne!(first, second);
        assert!(buffer.is_empty());
        assert_eq!(buffer.session_id(), Some(second));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut buffer = TimelineBuffer::new();
        buffer.start();
        buffer.add(entry("one"));
        buffer.set_latest_snapshot(vec![1, 2, 3]);

        buffer.clear();
        assert!(!buffer.is_active());
        assert!(buffer.is_empty());
        assert_eq!(buffer.latest_snapshot(), None);
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut buffer = TimelineBuffer::new();
        buffer.start();
        buffer.add(entry("first"));
        buffer.add(entry("second"));
        let texts: Vec<&str> = buffer
            .entries()
            .iter()
            .map(|e| e.finding.finding.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_wall_clock_format() {
        let e = entry("x");
        assert_eq!(e.wall_clock.len(), 8);
        assert_eq!(e.wall_clock.as_bytes()[2], b':');
        assert_eq!(e.wall_clock.as_bytes()[5], b':');
    }
}
