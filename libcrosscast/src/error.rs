//! Error types for Crosscast

use std::fmt;

use thiserror::Error;

use crate::types::Platform;

pub type Result<T> = std::result::Result<T, CrosscastError>;

#[derive(Error, Debug)]
pub enum CrosscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No connected account for {0}")]
    MissingDestinations(MissingDestinations),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl CrosscastError {
    /// Returns the HTTP status code this error maps to at the delivery
    /// boundary (kept here so the server crate never re-derives it).
    pub fn status_code(&self) -> u16 {
        match self {
            CrosscastError::Validation(_) => 400,
            CrosscastError::Precondition(_) => 400,
            CrosscastError::MissingDestinations(_) => 404,
            CrosscastError::Config(_) => 500,
            CrosscastError::Database(_) => 500,
            CrosscastError::Platform(_) => 500,
        }
    }

    /// Structured detail for wire error payloads, when the error has any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CrosscastError::MissingDestinations(md) => serde_json::to_value(md).ok(),
            CrosscastError::Platform(p) => p.details().cloned(),
            _ => None,
        }
    }
}

/// A publish attempt that stopped before the fan-out. The transcript has
/// already been persisted; it rides along so delivery surfaces can include
/// it in the error body.
#[derive(Debug)]
pub struct PublishAbort {
    pub error: CrosscastError,
    pub transcript: String,
    pub report_id: Option<i64>,
}

impl PublishAbort {
    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }
}

/// Requested destination ids that have no connected account, grouped by
/// platform. All requested destinations are checked before this is raised,
/// so the caller sees the complete missing set at once.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MissingDestinations {
    pub missing: Vec<MissingAccounts>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingAccounts {
    pub platform: Platform,
    pub account_ids: Vec<String>,
}

impl MissingDestinations {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn push(&mut self, platform: Platform, account_ids: Vec<String>) {
        if !account_ids.is_empty() {
            self.missing.push(MissingAccounts {
                platform,
                account_ids,
            });
        }
    }
}

impl fmt::Display for MissingDestinations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .missing
            .iter()
            .map(|m| format!("{}: {}", m.platform.as_str(), m.account_ids.join(", ")))
            .collect();
        write!(f, "{}", groups.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by a single platform call. These never cross the
/// orchestrator boundary as errors; publishers fold them into the failed
/// half of the outcome set, preserving platform codes untranslated.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("{message}")]
    Api {
        message: String,
        code: Option<String>,
        details: Option<serde_json::Value>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    pub fn api(message: impl Into<String>) -> Self {
        PlatformError::Api {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Machine-readable code supplied by the platform, when it gave one.
    pub fn code(&self) -> Option<&str> {
        match self {
            PlatformError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            PlatformError::Api { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}
