//! Event types for the ScopeView event system
//!
//! Provides shared event definitions and the EventBus used by the
//! analysis pipeline and live session handlers. Events are broadcast
//! via EventBus and serialized for SSE transmission.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Risk grading attached to findings and live timeline entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Default confidence assigned when the model reports this grade
    /// without a numeric confidence of its own.
    pub fn default_confidence(&self) -> f64 {
        match self {
            RiskLevel::High => 0.85,
            RiskLevel::Medium => 0.80,
            RiskLevel::Low => 0.75,
        }
    }

    /// Parse a risk grade from free model text. Substring match,
    /// case-insensitive; anything unrecognized grades low.
    pub fn parse_lenient(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("high") {
            RiskLevel::High
        } else if lower.contains("medium") {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// ScopeView event types
///
/// All pipeline and live-session events use this central enum for
/// exhaustive matching and a uniform SSE wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScopeEvent {
    /// Session accepted and queued for processing
    SessionQueued {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline worker picked the session up
    ProcessingStarted {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline progress changed
    ///
    /// Progress is a 0-100 integer; `stage` names the active pipeline
    /// stage (sampling, analysis, summary, export).
    ProgressUpdate {
        session_id: Uuid,
        progress: u8,
        stage: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A frame finished inference and its finding was persisted
    FrameAnalyzed {
        session_id: Uuid,
        frame_index: i64,
        risk_level: RiskLevel,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session reached the completed state
    SessionCompleted {
        session_id: Uuid,
        total_frames: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session reached the failed state
    SessionFailed {
        session_id: Uuid,
        stage: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Export bundle written and recorded on the session
    ExportReady {
        session_id: Uuid,
        export_path: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Live timeline opened for a new session id
    LiveSessionStarted {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Snapshot analysis produced a valid finding
    LiveFindingAdded {
        session_id: Uuid,
        risk_level: RiskLevel,
        finding: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Live timeline persisted as a completed session
    LiveSessionSaved {
        session_id: Uuid,
        entry_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Live timeline discarded
    LiveSessionCleared {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ScopeEvent {
    /// Event type name for SSE `event:` fields and logging
    pub fn event_type(&self) -> &str {
        match self {
            ScopeEvent::SessionQueued { .. } => "SessionQueued",
            ScopeEvent::ProcessingStarted { .. } => "ProcessingStarted",
            ScopeEvent::ProgressUpdate { .. } => "ProgressUpdate",
            ScopeEvent::FrameAnalyzed { .. } => "FrameAnalyzed",
            ScopeEvent::SessionCompleted { .. } => "SessionCompleted",
            ScopeEvent::SessionFailed { .. } => "SessionFailed",
            ScopeEvent::ExportReady { .. } => "ExportReady",
            ScopeEvent::LiveSessionStarted { .. } => "LiveSessionStarted",
            ScopeEvent::LiveFindingAdded { .. } => "LiveFindingAdded",
            ScopeEvent::LiveSessionSaved { .. } => "LiveSessionSaved",
            ScopeEvent::LiveSessionCleared { .. } => "LiveSessionCleared",
        }
    }
}

/// Broadcast bus for ScopeEvent distribution
///
/// Wraps a tokio broadcast channel. Slow subscribers lag rather than
/// block emitters; events emitted before subscription are not replayed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScopeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` with the event back if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ScopeEvent) -> Result<usize, broadcast::error::SendError<ScopeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// Used for routine progress events where an empty audience is normal.
    pub fn emit_lossy(&self, event: ScopeEvent) {
        let event_type = event.event_type().to_string();
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for event: {}", event_type);
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
