//! Data models for the video analysis service

mod finding;
mod session;
mod summary;

pub use finding::{Finding, FrameRecord};
pub use session::{
    AnalysisSession, PipelineStage, SessionKind, SessionStatus, StatusTransition, VideoMetadata,
};
pub use summary::{KeyFinding, SessionSummary};
