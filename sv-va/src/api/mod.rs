//! HTTP API

pub mod health;
pub mod live;
pub mod sessions;
pub mod sse;

pub use health::health_routes;
pub use live::live_routes;
pub use sessions::sessions_routes;
pub use sse::event_stream;
