//! Configuration management for Crosscast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub x: XConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Shared secret expected in X-Webhook-Secret on the scheduled-post
    /// drain endpoint. Unset disables the endpoint.
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    pub graph_url: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.facebook.com/v19.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    pub api_url: String,
    pub upload_url: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.x.com/2".to_string(),
            upload_url: "https://upload.twitter.com/1.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    pub graph_url: String,
    /// Container status polls before a processing video counts as timed out.
    pub poll_attempts: u32,
    pub poll_delay_secs: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.facebook.com/v19.0".to_string(),
            poll_attempts: 20,
            poll_delay_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Rewrite service endpoint. Unset means rewrite rules are ignored and
    /// content always passes through unchanged.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub download_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                path: "~/.local/share/crosscast/crosscast.db".to_string(),
            },
            facebook: FacebookConfig::default(),
            x: XConfig::default(),
            instagram: InstagramConfig::default(),
            telegram: TelegramConfig::default(),
            transform: TransformConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosscast"))
}
