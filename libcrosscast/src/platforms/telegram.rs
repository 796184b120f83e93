//! Telegram channel publisher
//!
//! Sends through the Bot API. A single media item goes out as a direct
//! photo or video message with the text as caption; two to ten items
//! become one media group where only the first item carries the caption
//! (the Bot API renders a group caption from it). More than ten items
//! cannot fit a media group, so that destination fails with a validation
//! error instead of silently truncating. Channels are sent one after
//! another; the Bot API throttles bots that burst.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::TelegramConfig;
use crate::error::PlatformError;
use crate::platforms::{PlatformPublisher, ProgressAction, ProgressSink, PublishTarget};
use crate::types::{MediaFile, OutcomeSet, Platform, ResourceType};

/// Bot API media group bound.
const MAX_MEDIA_GROUP: usize = 10;

/// One entry of a sendMediaGroup call.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaGroupItem {
    pub resource_type: ResourceType,
    pub url: String,
    pub caption: Option<String>,
}

/// Wire boundary for Bot API calls
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> std::result::Result<String, PlatformError>;

    async fn send_photo(
        &self,
        token: &str,
        chat_id: &str,
        photo_url: &str,
        caption: &str,
    ) -> std::result::Result<String, PlatformError>;

    async fn send_video(
        &self,
        token: &str,
        chat_id: &str,
        video_url: &str,
        caption: &str,
    ) -> std::result::Result<String, PlatformError>;

    /// Send 2..=10 items as one group, returning the first message id.
    async fn send_media_group(
        &self,
        token: &str,
        chat_id: &str,
        items: &[MediaGroupItem],
    ) -> std::result::Result<String, PlatformError>;
}

pub struct BotApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl BotApiClient {
    pub fn new(config: &TelegramConfig) -> std::result::Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call(
        &self,
        token: &str,
        method: &str,
        body: &Value,
    ) -> std::result::Result<Value, PlatformError> {
        let url = format!("{}/bot{}/{}", self.base_url, token, method);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        if payload["ok"].as_bool() != Some(true) {
            return Err(map_bot_error(&payload));
        }
        Ok(payload["result"].clone())
    }
}

fn message_id(result: &Value) -> std::result::Result<String, PlatformError> {
    result["message_id"]
        .as_i64()
        .map(|id| id.to_string())
        .ok_or_else(|| PlatformError::api("Bot API response missing message_id"))
}

/// Map a Bot API error body (`{"ok": false, "error_code", "description"}`).
fn map_bot_error(payload: &Value) -> PlatformError {
    let description = payload["description"]
        .as_str()
        .unwrap_or("Bot API request failed")
        .to_string();
    let code = payload["error_code"].as_i64();

    match code {
        Some(401) | Some(403) => PlatformError::Authentication(description),
        Some(429) => PlatformError::RateLimit(description),
        _ => PlatformError::Api {
            message: description,
            code: code.map(|c| c.to_string()),
            details: Some(payload.clone()),
        },
    }
}

#[async_trait]
impl TelegramApi for BotApiClient {
    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> std::result::Result<String, PlatformError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let result = self.call(token, "sendMessage", &body).await?;
        message_id(&result)
    }

    async fn send_photo(
        &self,
        token: &str,
        chat_id: &str,
        photo_url: &str,
        caption: &str,
    ) -> std::result::Result<String, PlatformError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "photo": photo_url });
        if !caption.is_empty() {
            body["caption"] = Value::String(caption.to_string());
        }
        let result = self.call(token, "sendPhoto", &body).await?;
        message_id(&result)
    }

    async fn send_video(
        &self,
        token: &str,
        chat_id: &str,
        video_url: &str,
        caption: &str,
    ) -> std::result::Result<String, PlatformError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "video": video_url });
        if !caption.is_empty() {
            body["caption"] = Value::String(caption.to_string());
        }
        let result = self.call(token, "sendVideo", &body).await?;
        message_id(&result)
    }

    async fn send_media_group(
        &self,
        token: &str,
        chat_id: &str,
        items: &[MediaGroupItem],
    ) -> std::result::Result<String, PlatformError> {
        let media: Vec<Value> = items
            .iter()
            .map(|item| {
                let mut entry = serde_json::json!({
                    "type": match item.resource_type {
                        ResourceType::Image => "photo",
                        ResourceType::Video => "video",
                    },
                    "media": item.url,
                });
                if let Some(caption) = &item.caption {
                    entry["caption"] = Value::String(caption.clone());
                }
                entry
            })
            .collect();

        let body = serde_json::json!({ "chat_id": chat_id, "media": media });
        let result = self.call(token, "sendMediaGroup", &body).await?;

        // sendMediaGroup returns the array of sent messages
        result
            .get(0)
            .and_then(|m| m["message_id"].as_i64())
            .map(|id| id.to_string())
            .ok_or_else(|| PlatformError::api("Bot API media group response was empty"))
    }
}

pub struct TelegramPublisher {
    api: Arc<dyn TelegramApi>,
}

impl TelegramPublisher {
    pub fn new(api: Arc<dyn TelegramApi>) -> Self {
        Self { api }
    }

    pub fn from_config(config: &TelegramConfig) -> std::result::Result<Self, PlatformError> {
        Ok(Self::new(Arc::new(BotApiClient::new(config)?)))
    }

    async fn publish_to_channel(
        &self,
        target: &PublishTarget,
        media: &[MediaFile],
    ) -> std::result::Result<String, PlatformError> {
        let token = &target.account.credential;
        let chat_id = &target.account.account_id;

        match media {
            [] => self.api.send_message(token, chat_id, &target.text).await,
            [single] => match single.asset.resource_type {
                ResourceType::Image => {
                    self.api
                        .send_photo(token, chat_id, &single.asset.public_url, &target.text)
                        .await
                }
                ResourceType::Video => {
                    self.api
                        .send_video(token, chat_id, &single.asset.public_url, &target.text)
                        .await
                }
            },
            items if items.len() <= MAX_MEDIA_GROUP => {
                let group: Vec<MediaGroupItem> = items
                    .iter()
                    .enumerate()
                    .map(|(i, file)| MediaGroupItem {
                        resource_type: file.asset.resource_type,
                        url: file.asset.public_url.clone(),
                        // The caption lives on the first item only; Telegram
                        // shows it under the whole group.
                        caption: if i == 0 && !target.text.is_empty() {
                            Some(target.text.clone())
                        } else {
                            None
                        },
                    })
                    .collect();
                self.api.send_media_group(token, chat_id, &group).await
            }
            items => Err(PlatformError::Validation(format!(
                "Telegram media groups allow at most {MAX_MEDIA_GROUP} items ({} requested)",
                items.len()
            ))),
        }
    }
}

#[async_trait]
impl PlatformPublisher for TelegramPublisher {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn publish(
        &self,
        targets: &[PublishTarget],
        media: &[MediaFile],
        progress: &dyn ProgressSink,
    ) -> OutcomeSet {
        let mut outcomes = OutcomeSet::default();
        for target in targets {
            progress.destination_update(
                Platform::Telegram,
                ProgressAction::Starting,
                &target.account.display_name,
            );
            let result = self.publish_to_channel(target, media).await;
            progress.destination_update(
                Platform::Telegram,
                ProgressAction::from_success(result.is_ok()),
                &target.account.display_name,
            );
            match result {
                Ok(message_id) => {
                    outcomes.record_success(
                        Platform::Telegram,
                        &target.account.account_id,
                        target.post_type,
                        message_id,
                    );
                }
                Err(e) => {
                    warn!(chat_id = %target.account.account_id, error = %e, "Telegram publish failed");
                    outcomes.record_failure(
                        Platform::Telegram,
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
