//! X (Twitter) publisher
//!
//! X is the one platform here that takes raw media bytes: items are
//! uploaded through the v1.1 media endpoint as base64, then a single v2
//! post references the returned media ids. Media ids are scoped to the
//! uploading account, so uploads repeat per account; accounts themselves
//! run concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::XConfig;
use crate::error::PlatformError;
use crate::platforms::{PlatformPublisher, ProgressAction, ProgressSink, PublishTarget};
use crate::types::{MediaFile, OutcomeSet, Platform};

/// A post may carry at most four media items.
const MAX_MEDIA_PER_POST: usize = 4;

/// Wire boundary for X API calls
#[async_trait]
pub trait XApi: Send + Sync {
    /// Upload one media item for the account, returning the media id.
    async fn upload_media(
        &self,
        token: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> std::result::Result<String, PlatformError>;

    /// Create a post, optionally referencing uploaded media ids.
    async fn create_post(
        &self,
        token: &str,
        text: &str,
        media_ids: &[String],
    ) -> std::result::Result<String, PlatformError>;
}

pub struct XClient {
    client: reqwest::Client,
    api_url: String,
    upload_url: String,
}

impl XClient {
    pub fn new(config: &XConfig) -> std::result::Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl XApi for XClient {
    async fn upload_media(
        &self,
        token: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> std::result::Result<String, PlatformError> {
        let category = if mime_type.starts_with("video/") {
            "tweet_video"
        } else {
            "tweet_image"
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let response = self
            .client
            .post(format!("{}/media/upload.json", self.upload_url))
            .bearer_auth(token)
            .form(&[("media_data", encoded.as_str()), ("media_category", category)])
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_x_error(&payload, status.as_u16()));
        }

        payload["media_id_string"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::api("media upload response missing media_id_string"))
    }

    async fn create_post(
        &self,
        token: &str,
        text: &str,
        media_ids: &[String],
    ) -> std::result::Result<String, PlatformError> {
        let mut body = serde_json::json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": media_ids });
        }

        let response = self
            .client
            .post(format!("{}/tweets", self.api_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_x_error(&payload, status.as_u16()));
        }

        payload["data"]["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::api("post response missing id"))
    }
}

/// Map an X error body (v2 `{title, detail}` or v1.1 `{errors: [...]}`).
fn map_x_error(payload: &Value, http_status: u16) -> PlatformError {
    let message = payload["detail"]
        .as_str()
        .or_else(|| payload["errors"][0]["message"].as_str())
        .or_else(|| payload["title"].as_str())
        .unwrap_or("X API request failed")
        .to_string();

    match http_status {
        401 | 403 => PlatformError::Authentication(message),
        429 => PlatformError::RateLimit(message),
        _ => PlatformError::Api {
            message,
            code: payload["errors"][0]["code"]
                .as_i64()
                .map(|c| c.to_string()),
            details: Some(payload.clone()),
        },
    }
}

pub struct XPublisher {
    api: Arc<dyn XApi>,
}

impl XPublisher {
    pub fn new(api: Arc<dyn XApi>) -> Self {
        Self { api }
    }

    pub fn from_config(config: &XConfig) -> std::result::Result<Self, PlatformError> {
        Ok(Self::new(Arc::new(XClient::new(config)?)))
    }

    async fn publish_for_account(
        &self,
        target: &PublishTarget,
        media: &[MediaFile],
    ) -> std::result::Result<String, PlatformError> {
        let token = &target.account.credential;

        // Uploads are sequential: each id must exist before the post that
        // references it, and the upload endpoint throttles aggressively.
        let mut media_ids = Vec::new();
        for file in media {
            if media_ids.len() == MAX_MEDIA_PER_POST {
                debug!(
                    account_id = %target.account.account_id,
                    dropped = media.len() - MAX_MEDIA_PER_POST,
                    "more media than a post can carry, extra items dropped"
                );
                break;
            }
            let Some(bytes) = &file.bytes else {
                debug!(public_id = %file.asset.public_id, "media has no downloaded bytes, skipping");
                continue;
            };
            let media_id = self
                .api
                .upload_media(token, bytes, &file.asset.mime_type())
                .await?;
            media_ids.push(media_id);
        }

        self.api.create_post(token, &target.text, &media_ids).await
    }
}

#[async_trait]
impl PlatformPublisher for XPublisher {
    fn platform(&self) -> Platform {
        Platform::X
    }

    async fn publish(
        &self,
        targets: &[PublishTarget],
        media: &[MediaFile],
        progress: &dyn ProgressSink,
    ) -> OutcomeSet {
        let futures: Vec<_> = targets
            .iter()
            .map(|target| async move {
                progress.destination_update(
                    Platform::X,
                    ProgressAction::Starting,
                    &target.account.display_name,
                );
                let result = self.publish_for_account(target, media).await;
                progress.destination_update(
                    Platform::X,
                    ProgressAction::from_success(result.is_ok()),
                    &target.account.display_name,
                );
                (target, result)
            })
            .collect();

        let mut outcomes = OutcomeSet::default();
        for (target, result) in join_all(futures).await {
            match result {
                Ok(post_id) => outcomes.record_success(
                    Platform::X,
                    &target.account.account_id,
                    target.post_type,
                    post_id,
                ),
                Err(e) => {
                    warn!(account_id = %target.account.account_id, error = %e, "X publish failed");
                    outcomes.record_failure(
                        Platform::X,
                        &target.account.account_id,
                        target.post_type,
                        &e,
                    );
                }
            }
        }
        outcomes
    }
}
