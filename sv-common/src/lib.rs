//! # ScopeView Common Library
//!
//! Shared code for the ScopeView services including:
//! - Event types (ScopeEvent enum) and the EventBus
//! - Common error types
//! - Timestamp formatting utilities

pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
