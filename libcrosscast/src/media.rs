//! Media pipeline
//!
//! Normalizes the request's hosted media assets into what publishers
//! consume. Raw bytes are downloaded only when the destination set includes
//! a platform that uploads bytes instead of referencing URLs; URL-native
//! destination sets never trigger a download.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::error::{PlatformError, Result};
use crate::types::{MediaAsset, MediaFile};

/// Raw-byte download seam. The production implementation is HTTP; tests
/// substitute canned responses.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, PlatformError>;
}

pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, PlatformError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("media download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PlatformError::api(format!(
                "media download failed with status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Network(format!("media download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Pipeline output: the usable files plus a human-readable note per asset
/// that failed to download. Failed assets are skipped, never fatal on
/// their own.
#[derive(Debug, Default)]
pub struct NormalizedMedia {
    pub files: Vec<MediaFile>,
    pub errors: Vec<String>,
}

impl NormalizedMedia {
    /// True when downloads were required and every single one failed.
    /// The orchestrator aborts precondition-style on this.
    pub fn all_failed(&self) -> bool {
        self.files.is_empty() && !self.errors.is_empty()
    }
}

pub struct MediaPipeline {
    fetcher: Arc<dyn MediaFetcher>,
}

impl MediaPipeline {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }

    /// Normalize the asset list. With `download_bytes` false this is a pure
    /// passthrough; with it true, assets are fetched concurrently and each
    /// failure is recorded and skipped.
    pub async fn normalize(&self, assets: &[MediaAsset], download_bytes: bool) -> NormalizedMedia {
        if !download_bytes {
            return NormalizedMedia {
                files: assets.iter().cloned().map(MediaFile::url_only).collect(),
                errors: Vec::new(),
            };
        }

        let downloads = assets.iter().map(|asset| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                let result = fetcher.fetch(&asset.public_url).await;
                (asset.clone(), result)
            }
        });

        let mut normalized = NormalizedMedia::default();
        for (asset, result) in join_all(downloads).await {
            match result {
                Ok(bytes) => normalized.files.push(MediaFile {
                    asset,
                    bytes: Some(bytes),
                }),
                Err(err) => {
                    warn!(public_id = %asset.public_id, error = %err, "media download failed");
                    normalized
                        .errors
                        .push(format!("{}: {}", asset.public_id, err));
                }
            }
        }
        normalized
    }
}
