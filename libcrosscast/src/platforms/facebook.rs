//! Facebook page publisher
//!
//! Publishes to Facebook Pages through the Graph API. Photos are uploaded
//! unpublished first and attached to one combined feed post so multi-photo
//! publishes appear as a single story; videos go out as individual posts
//! because the Graph API has no combined photo+video container. Mixed media
//! reaching this publisher (normally rejected upstream) splits into both
//! paths, and the combined photo post id identifies the destination.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FacebookConfig;
use crate::error::PlatformError;
use crate::platforms::{
    split_media, PlatformPublisher, ProgressAction, ProgressSink, PublishTarget,
};
use crate::types::{MediaFile, OutcomeSet, Platform};

/// Wire boundary for Graph API calls
///
/// Publisher logic is tested against scripted implementations of this
/// trait; `GraphClient` is the production implementation.
#[async_trait]
pub trait FacebookApi: Send + Sync {
    /// Post a text-only message to a page feed, returning the post id.
    async fn publish_text(
        &self,
        page_id: &str,
        token: &str,
        message: &str,
    ) -> std::result::Result<String, PlatformError>;

    /// Upload one photo by URL without publishing it, returning the media id.
    async fn upload_photo(
        &self,
        page_id: &str,
        token: &str,
        photo_url: &str,
    ) -> std::result::Result<String, PlatformError>;

    /// Publish a feed post with previously uploaded photos attached.
    async fn publish_photo_post(
        &self,
        page_id: &str,
        token: &str,
        message: &str,
        media_ids: &[String],
    ) -> std::result::Result<String, PlatformError>;

    /// Publish one video by URL, returning the video post id.
    async fn publish_video(
        &self,
        page_id: &str,
        token: &str,
        description: &str,
        video_url: &str,
    ) -> std::result::Result<String, PlatformError>;
}

/// Production Graph API client
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(config: &FacebookConfig) -> std::result::Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.graph_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> std::result::Result<Value, PlatformError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(map_graph_error(&payload, status.as_u16()));
        }
        Ok(payload)
    }
}

#[async_trait]
impl FacebookApi for GraphClient {
    async fn publish_text(
        &self,
        page_id: &str,
        token: &str,
        message: &str,
    ) -> std::result::Result<String, PlatformError> {
        let payload = self
            .post_form(
                &format!("{page_id}/feed"),
                &[("message", message), ("access_token", token)],
            )
            .await?;
        extract_id(&payload)
    }

    async fn upload_photo(
        &self,
        page_id: &str,
        token: &str,
        photo_url: &str,
    ) -> std::result::Result<String, PlatformError> {
        let payload = self
            .post_form(
                &format!("{page_id}/photos"),
                &[
                    ("url", photo_url),
                    ("published", "false"),
                    ("access_token", token),
                ],
            )
            .await?;
        extract_id(&payload)
    }

    async fn publish_photo_post(
        &self,
        page_id: &str,
        token: &str,
        message: &str,
        media_ids: &[String],
    ) -> std::result::Result<String, PlatformError> {
        let mut form: Vec<(String, String)> = vec![
            ("message".to_string(), message.to_string()),
            ("access_token".to_string(), token.to_string()),
        ];
        for (i, media_id) in media_ids.iter().enumerate() {
            form.push((
                format!("attached_media[{i}]"),
                format!("{{\"media_fbid\":\"{media_id}\"}}"),
            ));
        }

        let borrowed: Vec<(&str, &str)> = form
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let payload = self.post_form(&format!("{page_id}/feed"), &borrowed).await?;
        extract_id(&payload)
    }

    async fn publish_video(
        &self,
        page_id: &str,
        token: &str,
        description: &str,
        video_url: &str,
    ) -> std::result::Result<String, PlatformError> {
        let payload = self
            .post_form(
                &format!("{page_id}/videos"),
                &[
                    ("file_url", video_url),
                    ("description", description),
                    ("access_token", token),
                ],
            )
            .await?;
        extract_id(&payload)
    }
}

fn extract_id(payload: &Value) -> std::result::Result<String, PlatformError> {
    payload["id"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| PlatformError::api("Graph API response missing id"))
}

/// Map a Graph API error body to PlatformError
///
/// Graph errors arrive as `{"error": {"message", "type", "code",
/// "error_subcode", ...}}`. The numeric code and the raw error object are
/// preserved so callers can surface them untranslated. Instagram shares
/// this error shape, so its client reuses the mapper.
pub(crate) fn map_graph_error(payload: &Value, http_status: u16) -> PlatformError {
    let error = &payload["error"];
    let message = error["message"]
        .as_str()
        .unwrap_or("Graph API request failed")
        .to_string();
    let error_type = error["type"].as_str().unwrap_or("");
    let code = error["code"].as_i64();

    if error_type == "OAuthException" && code != Some(32) {
        return PlatformError::Authentication(message);
    }
    // Codes 4, 17 and 32 are the documented Graph throttling codes
    if matches!(code, Some(4) | Some(17) | Some(32)) || http_status == 429 {
        return PlatformError::RateLimit(message);
    }

    PlatformError::Api {
        message,
        code: code.map(|c| c.to_string()),
        details: if error.is_null() {
            None
        } else {
            Some(error.clone())
        },
    }
}

/// Facebook page publisher
///
/// Pages run concurrently; within a page, photo uploads are sequential so
/// attachment order matches the request order.
pub struct FacebookPublisher {
    api: Arc<dyn FacebookApi>,
}

impl FacebookPublisher {
    pub fn new(api: Arc<dyn FacebookApi>) -> Self {
        Self { api }
    }

    pub fn from_config(config: &FacebookConfig) -> std::result::Result<Self, PlatformError> {
        Ok(Self::new(Arc::new(GraphClient::new(config)?)))
    }

    async fn publish_to_page(
        &self,
        target: &PublishTarget,
        media: &[MediaFile],
    ) -> std::result::Result<String, PlatformError> {
        let page_id = &target.account.account_id;
        let token = &target.account.credential;
        let (images, videos) = split_media(media);

        if images.is_empty() && videos.is_empty() {
            return self.api.publish_text(page_id, token, &target.text).await;
        }

        let mut photo_post_id = None;
        if !images.is_empty() {
            let mut media_ids = Vec::with_capacity(images.len());
            for image in &images {
                let media_id = self
                    .api
                    .upload_photo(page_id, token, &image.asset.public_url)
                    .await?;
                debug!(page_id, media_id, "uploaded unpublished photo");
                media_ids.push(media_id);
            }
            photo_post_id = Some(
                self.api
                    .publish_photo_post(page_id, token, &target.text, &media_ids)
                    .await?,
            );
        }

        let mut first_video_post_id = None;
        for video in &videos {
            let post_id = self
                .api
                .publish_video(page_id, token, &target.text, &video.asset.public_url)
                .await?;
            if first_video_post_id.is_none() {
                first_video_post_id = Some(post_id);
            }
        }

        // On a mixed split the combined photo post identifies the
        // destination, otherwise the first video post does.
        photo_post_id
            .or(first_video_post_id)
            .ok_or_else(|| PlatformError::api("no post was created"))
    }
}

#[async_trait]
impl PlatformPublisher for FacebookPublisher {
    fn platform(&self) -> Platform {
        Platform::Facebook
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
                    Platform::Facebook,
                    ProgressAction::Starting,
                    &target.account.display_name,
                );
                let result = self.publish_to_page(target, media).await;
                progress.destination_update(
                    Platform::Facebook,
                    ProgressAction::from_success(result.is_ok()),
                    &target.account.display_name,
                );
                (target, result)
            })
            .collect();

        let mut outcomes = OutcomeSet::default();
        for (target, result) in join_all(futures).await {
            match result {
                Ok(post_id) => {
                    outcomes.record_success(
                        Platform::Facebook,
                        &target.account.account_id,
                        target.post_type,
                        post_id,
                    );
                }
                Err(e) => {
                    warn!(page_id = %target.account.account_id, error = %e, "Facebook publish failed");
                    outcomes.record_failure(
                        Platform::Facebook,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::NullProgress;
    use crate::tokens::ResolvedAccount;
    use crate::types::{MediaAsset, ResourceType};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text { page: String },
        Upload { page: String, url: String },
        PhotoPost { page: String, media_ids: Vec<String> },
        Video { page: String, url: String },
    }

    /// Scripted Graph API double. `fail_uploads_for` makes photo uploads
    /// fail on the named page only.
    #[derive(Default)]
    struct FakeGraph {
        calls: Mutex<Vec<Call>>,
        fail_uploads_for: Option<String>,
    }

    impl FakeGraph {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FacebookApi for FakeGraph {
        async fn publish_text(
            &self,
            page_id: &str,
            _token: &str,
            _message: &str,
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::Text {
                page: page_id.to_string(),
            });
            Ok(format!("{page_id}_text"))
        }

        async fn upload_photo(
            &self,
            page_id: &str,
            _token: &str,
            photo_url: &str,
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::Upload {
                page: page_id.to_string(),
                url: photo_url.to_string(),
            });
            if self.fail_uploads_for.as_deref() == Some(page_id) {
                return Err(PlatformError::api("upload rejected"));
            }
            Ok(format!("media_{}", photo_url.len()))
        }

        async fn publish_photo_post(
            &self,
            page_id: &str,
            _token: &str,
            _message: &str,
            media_ids: &[String],
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::PhotoPost {
                page: page_id.to_string(),
                media_ids: media_ids.to_vec(),
            });
            Ok(format!("{page_id}_photo_post"))
        }

        async fn publish_video(
            &self,
            page_id: &str,
            _token: &str,
            _description: &str,
            video_url: &str,
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::Video {
                page: page_id.to_string(),
                url: video_url.to_string(),
            });
            Ok(format!("{page_id}_video_post"))
        }
    }

    fn target(page_id: &str) -> PublishTarget {
        PublishTarget {
            account: ResolvedAccount {
                account_id: page_id.to_string(),
                display_name: format!("Page {page_id}"),
                credential: "page-token".to_string(),
            },
            post_type: None,
            text: "launch day".to_string(),
        }
    }

    fn image(id: &str) -> MediaFile {
        MediaFile::url_only(MediaAsset {
            public_id: id.to_string(),
            public_url: format!("https://cdn.example.com/{id}.jpg"),
            resource_type: ResourceType::Image,
            format: Some("jpg".to_string()),
            width: None,
            height: None,
            original_filename: None,
        })
    }

    fn video(id: &str) -> MediaFile {
        MediaFile::url_only(MediaAsset {
            public_id: id.to_string(),
            public_url: format!("https://cdn.example.com/{id}.mp4"),
            resource_type: ResourceType::Video,
            format: Some("mp4".to_string()),
            width: None,
            height: None,
            original_filename: None,
        })
    }

    fn publisher(api: FakeGraph) -> (FacebookPublisher, Arc<FakeGraph>) {
        let api = Arc::new(api);
        (FacebookPublisher::new(api.clone()), api)
    }

    #[tokio::test]
    async fn test_text_only_posts_to_feed() {
        let (publisher, api) = publisher(FakeGraph::default());
        let outcomes = publisher
            .publish(&[target("page1")], &[], &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].platform_post_id, "page1_text");
        assert_eq!(
            api.calls(),
            vec![Call::Text {
                page: "page1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_photos_upload_unpublished_then_combine() {
        let (publisher, api) = publisher(FakeGraph::default());
        let media = vec![image("a"), image("b")];
        let outcomes = publisher
            .publish(&[target("page1")], &media, &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].platform_post_id, "page1_photo_post");

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[0], Call::Upload { .. }));
        assert!(matches!(&calls[1], Call::Upload { .. }));
        match &calls[2] {
            Call::PhotoPost { media_ids, .. } => assert_eq!(media_ids.len(), 2),
            other => panic!("expected combined photo post, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_videos_post_individually() {
        let (publisher, api) = publisher(FakeGraph::default());
        let media = vec![video("v1"), video("v2")];
        let outcomes = publisher
            .publish(&[target("page1")], &media, &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].platform_post_id, "page1_video_post");
        assert_eq!(
            api.calls()
                .iter()
                .filter(|c| matches!(c, Call::Video { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_mixed_media_splits_and_photo_post_id_wins() {
        let (publisher, api) = publisher(FakeGraph::default());
        let media = vec![video("v1"), image("a")];
        let outcomes = publisher
            .publish(&[target("page1")], &media, &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].platform_post_id, "page1_photo_post");

        let calls = api.calls();
        assert!(calls.iter().any(|c| matches!(c, Call::PhotoPost { .. })));
        assert!(calls.iter().any(|c| matches!(c, Call::Video { .. })));
    }

    #[tokio::test]
    async fn test_one_failing_page_does_not_sink_others() {
        let (publisher, _api) = publisher(FakeGraph {
            fail_uploads_for: Some("bad".to_string()),
            ..Default::default()
        });
        let media = vec![image("a")];
        let outcomes = publisher
            .publish(&[target("good"), target("bad")], &media, &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].account_id, "good");
        assert_eq!(outcomes.failed.len(), 1);
        assert_eq!(outcomes.failed[0].account_id, "bad");
        assert_eq!(outcomes.failed[0].error.message, "upload rejected");
    }

    #[test]
    fn test_map_graph_error_oauth() {
        let payload = serde_json::json!({
            "error": {
                "message": "Error validating access token",
                "type": "OAuthException",
                "code": 190
            }
        });
        assert!(matches!(
            map_graph_error(&payload, 400),
            PlatformError::Authentication(_)
        ));
    }

    #[test]
    fn test_map_graph_error_rate_limit() {
        let payload = serde_json::json!({
            "error": { "message": "too many calls", "type": "ApiException", "code": 4 }
        });
        assert!(matches!(
            map_graph_error(&payload, 400),
            PlatformError::RateLimit(_)
        ));
    }

    #[test]
    fn test_map_graph_error_preserves_code_and_details() {
        let payload = serde_json::json!({
            "error": { "message": "invalid parameter", "code": 100, "error_subcode": 2018001 }
        });
        match map_graph_error(&payload, 400) {
            PlatformError::Api {
                message,
                code,
                details,
            } => {
                assert_eq!(message, "invalid parameter");
                assert_eq!(code.as_deref(), Some("100"));
                assert_eq!(details.unwrap()["error_subcode"], 2018001);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
