//! sv-va library interface
//!
//! Exposes the service internals for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod live;
pub mod models;
pub mod services;
pub mod storage;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use sv_common::events::EventBus;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServiceConfig;
use crate::live::timeline::TimelineBuffer;
use crate::services::inference::InferenceEngine;
use crate::services::jobs::JobQueue;
use crate::storage::FrameStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service configuration
    pub config: ServiceConfig,
    /// Frame image and export storage
    pub store: FrameStore,
    /// Model server client
    pub engine: Arc<dyn InferenceEngine>,
    /// Live session buffer
    pub timeline: Arc<Mutex<TimelineBuffer>>,
    /// Pipeline job queue
    pub jobs: JobQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: ServiceConfig,
        store: FrameStore,
        engine: Arc<dyn InferenceEngine>,
        jobs: JobQueue,
    ) -> Self {
        Self {
            db,
            event_bus,
            config,
            store,
            engine,
            timeline: Arc::new(Mutex::new(TimelineBuffer::new())),
            jobs,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::sessions_routes())
        .merge(api::live_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
