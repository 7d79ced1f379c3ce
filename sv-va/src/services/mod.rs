//! Pipeline services

pub mod analyzer;
pub mod exporter;
pub mod extractor;
pub mod frame_sampler;
pub mod inference;
pub mod jobs;
pub mod orchestrator;
pub mod summarizer;
