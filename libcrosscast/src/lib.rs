//! Crosscast - one post, every connected platform
//!
//! This library implements the publish pipeline behind the Crosscast
//! server: request validation, media normalization, credential resolution,
//! per-destination content rewriting, and the concurrent fan-out to
//! Facebook, X, Instagram, and Telegram.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod platforms;
pub mod service;
pub mod tokens;
pub mod transform;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{CrosscastError, PublishAbort, Result};
pub use orchestrator::{Orchestrator, PublishOutcome};
pub use types::{Destination, OutcomeSet, Platform, PostType, PublishRequest, ReportStatus};
