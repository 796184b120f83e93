//! Instagram publisher
//!
//! Instagram publishes in two phases: create a media container, then
//! publish it. Containers holding video transcode asynchronously, so the
//! publisher polls `status_code` until the container is ready, fails, or
//! the configured polling budget runs out. Image containers are ready the
//! moment they are created and skip polling entirely.
//!
//! Feed and story are distinct destinations that share one account
//! credential: a feed video becomes a REELS container, story media becomes
//! a STORIES container, and two or more feed images become child
//! containers under a CAROUSEL parent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::InstagramConfig;
use crate::error::PlatformError;
use crate::platforms::facebook::map_graph_error;
use crate::platforms::{
    split_media, PlatformPublisher, ProgressAction, ProgressSink, PublishTarget,
};
use crate::types::{MediaFile, OutcomeSet, Platform, PostType};

/// Lifecycle of a media container between creation and publish.
///
/// `Failed` and `TimedOut` are terminal: the destination fails. `Ready`
/// is the only state from which publishing proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Processing,
    Ready,
    Failed,
    TimedOut,
}

impl ContainerState {
    /// Map a Graph `status_code` onto the machine.
    pub fn from_status_code(code: &str) -> Self {
        match code {
            "FINISHED" | "PUBLISHED" => ContainerState::Ready,
            "IN_PROGRESS" => ContainerState::Processing,
            "ERROR" | "EXPIRED" => ContainerState::Failed,
            _ => ContainerState::Created,
        }
    }
}

/// Parameters for one container creation call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerRequest {
    pub media_type: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub caption: Option<String>,
    pub children: Vec<String>,
    pub is_carousel_item: bool,
}

impl ContainerRequest {
    pub fn feed_image(url: &str, caption: &str) -> Self {
        Self {
            image_url: Some(url.to_string()),
            caption: some_caption(caption),
            ..Default::default()
        }
    }

    pub fn carousel_child(url: &str) -> Self {
        Self {
            image_url: Some(url.to_string()),
            is_carousel_item: true,
            ..Default::default()
        }
    }

    pub fn carousel(children: Vec<String>, caption: &str) -> Self {
        Self {
            media_type: Some("CAROUSEL".to_string()),
            children,
            caption: some_caption(caption),
            ..Default::default()
        }
    }

    pub fn reel(url: &str, caption: &str) -> Self {
        Self {
            media_type: Some("REELS".to_string()),
            video_url: Some(url.to_string()),
            caption: some_caption(caption),
            ..Default::default()
        }
    }

    pub fn story_image(url: &str) -> Self {
        Self {
            media_type: Some("STORIES".to_string()),
            image_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn story_video(url: &str) -> Self {
        Self {
            media_type: Some("STORIES".to_string()),
            video_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    /// True when the container transcodes asynchronously and must be
    /// polled before publishing.
    pub fn needs_polling(&self) -> bool {
        self.video_url.is_some()
    }
}

fn some_caption(caption: &str) -> Option<String> {
    if caption.is_empty() {
        None
    } else {
        Some(caption.to_string())
    }
}

/// Wire boundary for the Instagram Graph API
#[async_trait]
pub trait InstagramApi: Send + Sync {
    /// Create a media container, returning its id.
    async fn create_container(
        &self,
        ig_user_id: &str,
        token: &str,
        request: &ContainerRequest,
    ) -> std::result::Result<String, PlatformError>;

    /// Read a container's processing state.
    async fn container_status(
        &self,
        container_id: &str,
        token: &str,
    ) -> std::result::Result<ContainerState, PlatformError>;

    /// Publish a ready container, returning the media id.
    async fn publish_container(
        &self,
        ig_user_id: &str,
        token: &str,
        container_id: &str,
    ) -> std::result::Result<String, PlatformError>;
}

pub struct InstagramClient {
    client: reqwest::Client,
    base_url: String,
}

impl InstagramClient {
    pub fn new(config: &InstagramConfig) -> std::result::Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.graph_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(
        response: reqwest::Response,
    ) -> std::result::Result<Value, PlatformError> {
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
impl InstagramApi for InstagramClient {
    async fn create_container(
        &self,
        ig_user_id: &str,
        token: &str,
        request: &ContainerRequest,
    ) -> std::result::Result<String, PlatformError> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("access_token", token.to_string());
        if let Some(media_type) = &request.media_type {
            form.insert("media_type", media_type.clone());
        }
        if let Some(url) = &request.image_url {
            form.insert("image_url", url.clone());
        }
        if let Some(url) = &request.video_url {
            form.insert("video_url", url.clone());
        }
        if let Some(caption) = &request.caption {
            form.insert("caption", caption.clone());
        }
        if !request.children.is_empty() {
            form.insert("children", request.children.join(","));
        }
        if request.is_carousel_item {
            form.insert("is_carousel_item", "true".to_string());
        }

        let response = self
            .client
            .post(format!("{}/{}/media", self.base_url, ig_user_id))
            .form(&form)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        let payload = Self::check(response).await?;

        payload["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::api("container response missing id"))
    }

    async fn container_status(
        &self,
        container_id: &str,
        token: &str,
    ) -> std::result::Result<ContainerState, PlatformError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, container_id))
            .query(&[("fields", "status_code"), ("access_token", token)])
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        let payload = Self::check(response).await?;

        let code = payload["status_code"].as_str().unwrap_or("");
        Ok(ContainerState::from_status_code(code))
    }

    async fn publish_container(
        &self,
        ig_user_id: &str,
        token: &str,
        container_id: &str,
    ) -> std::result::Result<String, PlatformError> {
        let response = self
            .client
            .post(format!("{}/{}/media_publish", self.base_url, ig_user_id))
            .form(&[("creation_id", container_id), ("access_token", token)])
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        let payload = Self::check(response).await?;

        payload["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PlatformError::api("publish response missing id"))
    }
}

pub struct InstagramPublisher {
    api: Arc<dyn InstagramApi>,
    poll_attempts: u32,
    poll_delay: Duration,
}

impl InstagramPublisher {
    pub fn new(api: Arc<dyn InstagramApi>, poll_attempts: u32, poll_delay: Duration) -> Self {
        Self {
            api,
            poll_attempts,
            poll_delay,
        }
    }

    pub fn from_config(config: &InstagramConfig) -> std::result::Result<Self, PlatformError> {
        Ok(Self::new(
            Arc::new(InstagramClient::new(config)?),
            config.poll_attempts,
            Duration::from_secs(config.poll_delay_secs),
        ))
    }

    /// Drive the container state machine to a terminal state.
    ///
    /// Returns `Ready`, `Failed`, or `TimedOut`; the last after
    /// `poll_attempts` checks spaced `poll_delay` apart.
    async fn await_container(
        &self,
        container_id: &str,
        token: &str,
    ) -> std::result::Result<ContainerState, PlatformError> {
        for attempt in 1..=self.poll_attempts {
            let state = self.api.container_status(container_id, token).await?;
            match state {
                ContainerState::Ready | ContainerState::Failed => return Ok(state),
                ContainerState::Created | ContainerState::Processing => {
                    debug!(container_id, attempt, "container still processing");
                    if attempt < self.poll_attempts {
                        sleep(self.poll_delay).await;
                    }
                }
                // Only this machine produces TimedOut
                ContainerState::TimedOut => return Ok(ContainerState::TimedOut),
            }
        }
        Ok(ContainerState::TimedOut)
    }

    /// Create a container, wait for it if it transcodes, and publish it.
    async fn run_container(
        &self,
        ig_user_id: &str,
        token: &str,
        request: &ContainerRequest,
    ) -> std::result::Result<String, PlatformError> {
        let container_id = self.api.create_container(ig_user_id, token, request).await?;

        if request.needs_polling() {
            match self.await_container(&container_id, token).await? {
                ContainerState::Ready => {}
                ContainerState::Failed => {
                    return Err(PlatformError::api(format!(
                        "container {container_id} failed processing"
                    )));
                }
                ContainerState::TimedOut => {
                    return Err(PlatformError::Timeout(format!(
                        "container {container_id} not ready after {} checks",
                        self.poll_attempts
                    )));
                }
                // await_container only returns terminal states
                other => {
                    return Err(PlatformError::api(format!(
                        "container {container_id} in unexpected state {other:?}"
                    )));
                }
            }
        }

        self.api
            .publish_container(ig_user_id, token, &container_id)
            .await
    }

    async fn publish_feed(
        &self,
        target: &PublishTarget,
        media: &[MediaFile],
    ) -> std::result::Result<String, PlatformError> {
        let ig_user_id = &target.account.account_id;
        let token = &target.account.credential;
        let (images, videos) = split_media(media);

        if !videos.is_empty() {
            if videos.len() > 1 {
                debug!(
                    ig_user_id,
                    extra = videos.len() - 1,
                    "feed publishes one video, extra items ignored"
                );
            }
            let request = ContainerRequest::reel(&videos[0].asset.public_url, &target.text);
            return self.run_container(ig_user_id, token, &request).await;
        }

        match images.len() {
            0 => Err(PlatformError::Validation(
                "Instagram feed requires at least one media item".to_string(),
            )),
            1 => {
                let request = ContainerRequest::feed_image(&images[0].asset.public_url, &target.text);
                self.run_container(ig_user_id, token, &request).await
            }
            _ => {
                // Children are created sequentially so the carousel keeps
                // the request's media order.
                let mut children = Vec::with_capacity(images.len());
                for image in &images {
                    let request = ContainerRequest::carousel_child(&image.asset.public_url);
                    let child_id = self.api.create_container(ig_user_id, token, &request).await?;
                    children.push(child_id);
                }
                let request = ContainerRequest::carousel(children, &target.text);
                self.run_container(ig_user_id, token, &request).await
            }
        }
    }

    async fn publish_story(
        &self,
        target: &PublishTarget,
        media: &[MediaFile],
    ) -> std::result::Result<String, PlatformError> {
        let ig_user_id = &target.account.account_id;
        let token = &target.account.credential;

        let Some(file) = media.first() else {
            return Err(PlatformError::Validation(
                "Instagram story requires a media item".to_string(),
            ));
        };
        if media.len() > 1 {
            debug!(
                ig_user_id,
                extra = media.len() - 1,
                "story publishes one media item, extra items ignored"
            );
        }

        let request = match file.asset.resource_type {
            crate::types::ResourceType::Image => {
                ContainerRequest::story_image(&file.asset.public_url)
            }
            crate::types::ResourceType::Video => {
                ContainerRequest::story_video(&file.asset.public_url)
            }
        };
        self.run_container(ig_user_id, token, &request).await
    }
}

#[async_trait]
impl PlatformPublisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
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
                    Platform::Instagram,
                    ProgressAction::Starting,
                    &target.account.display_name,
                );
                let result = if target.post_type == Some(PostType::Story) {
                    self.publish_story(target, media).await
                } else {
                    self.publish_feed(target, media).await
                };
                progress.destination_update(
                    Platform::Instagram,
                    ProgressAction::from_success(result.is_ok()),
                    &target.account.display_name,
                );
                (target, result)
            })
            .collect();

        let mut outcomes = OutcomeSet::default();
        for (target, result) in join_all(futures).await {
            match result {
                Ok(media_id) => {
                    outcomes.record_success(
                        Platform::Instagram,
                        &target.account.account_id,
                        target.post_type,
                        media_id,
                    );
                }
                Err(e) => {
                    warn!(
                        ig_user_id = %target.account.account_id,
                        post_type = ?target.post_type,
                        error = %e,
                        "Instagram publish failed"
                    );
                    outcomes.record_failure(
                        Platform::Instagram,
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
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create {
            media_type: Option<String>,
            is_child: bool,
            children: usize,
        },
        Status,
        Publish {
            container_id: String,
        },
    }

    /// Scripted Graph double. `statuses` feeds `container_status` in order;
    /// when empty, status reads return `Ready`.
    struct FakeInstagram {
        calls: Mutex<Vec<Call>>,
        statuses: Mutex<VecDeque<ContainerState>>,
        next_id: AtomicUsize,
    }

    impl FakeInstagram {
        fn new(statuses: Vec<ContainerState>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                statuses: Mutex::new(statuses.into()),
                next_id: AtomicUsize::new(1),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn status_checks(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Status))
                .count()
        }
    }

    #[async_trait]
    impl InstagramApi for FakeInstagram {
        async fn create_container(
            &self,
            _ig_user_id: &str,
            _token: &str,
            request: &ContainerRequest,
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::Create {
                media_type: request.media_type.clone(),
                is_child: request.is_carousel_item,
                children: request.children.len(),
            });
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("c{id}"))
        }

        async fn container_status(
            &self,
            _container_id: &str,
            _token: &str,
        ) -> std::result::Result<ContainerState, PlatformError> {
            self.calls.lock().unwrap().push(Call::Status);
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ContainerState::Ready))
        }

        async fn publish_container(
            &self,
            _ig_user_id: &str,
            _token: &str,
            container_id: &str,
        ) -> std::result::Result<String, PlatformError> {
            self.calls.lock().unwrap().push(Call::Publish {
                container_id: container_id.to_string(),
            });
            Ok(format!("media_for_{container_id}"))
        }
    }

    fn publisher(api: Arc<FakeInstagram>, attempts: u32) -> InstagramPublisher {
        InstagramPublisher::new(api, attempts, Duration::from_millis(0))
    }

    fn target(account_id: &str, post_type: PostType) -> PublishTarget {
        PublishTarget {
            account: ResolvedAccount {
                account_id: account_id.to_string(),
                display_name: format!("ig-{account_id}"),
                credential: "ig-token".to_string(),
            },
            post_type: Some(post_type),
            text: "caption".to_string(),
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

    #[tokio::test]
    async fn test_single_image_skips_polling() {
        let api = Arc::new(FakeInstagram::new(vec![]));
        let outcomes = publisher(api.clone(), 20)
            .publish(&[target("ig1", PostType::Post)], &[image("a")], &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(api.status_checks(), 0);
        assert_eq!(
            api.calls(),
            vec![
                Call::Create {
                    media_type: None,
                    is_child: false,
                    children: 0
                },
                Call::Publish {
                    container_id: "c1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_two_images_build_carousel() {
        let api = Arc::new(FakeInstagram::new(vec![]));
        let outcomes = publisher(api.clone(), 20)
            .publish(
                &[target("ig1", PostType::Post)],
                &[image("a"), image("b")],
                &NullProgress,
            )
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        let calls = api.calls();
        assert_eq!(
            calls[0],
            Call::Create {
                media_type: None,
                is_child: true,
                children: 0
            }
        );
        assert_eq!(
            calls[1],
            Call::Create {
                media_type: None,
                is_child: true,
                children: 0
            }
        );
        assert_eq!(
            calls[2],
            Call::Create {
                media_type: Some("CAROUSEL".to_string()),
                is_child: false,
                children: 2
            }
        );
        assert_eq!(
            calls[3],
            Call::Publish {
                container_id: "c3".to_string()
            }
        );
        assert_eq!(api.status_checks(), 0);
    }

    #[tokio::test]
    async fn test_feed_video_becomes_reel_and_polls() {
        let api = Arc::new(FakeInstagram::new(vec![
            ContainerState::Processing,
            ContainerState::Processing,
            ContainerState::Ready,
        ]));
        let outcomes = publisher(api.clone(), 20)
            .publish(&[target("ig1", PostType::Post)], &[video("v")], &NullProgress)
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(api.status_checks(), 3);
        assert!(api.calls().contains(&Call::Create {
            media_type: Some("REELS".to_string()),
            is_child: false,
            children: 0
        }));
    }

    #[tokio::test]
    async fn test_processing_exhausts_polling_budget() {
        let api = Arc::new(FakeInstagram::new(vec![
            ContainerState::Processing;
            10
        ]));
        let outcomes = publisher(api.clone(), 3)
            .publish(&[target("ig1", PostType::Post)], &[video("v")], &NullProgress)
            .await;

        assert_eq!(outcomes.failed.len(), 1);
        assert!(outcomes.failed[0].error.message.contains("not ready"));
        // Exactly the configured number of checks, then give up
        assert_eq!(api.status_checks(), 3);
        assert!(!api
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Publish { .. })));
    }

    #[tokio::test]
    async fn test_container_error_fails_destination() {
        let api = Arc::new(FakeInstagram::new(vec![ContainerState::Failed]));
        let outcomes = publisher(api.clone(), 20)
            .publish(&[target("ig1", PostType::Post)], &[video("v")], &NullProgress)
            .await;

        assert_eq!(outcomes.failed.len(), 1);
        assert!(outcomes.failed[0].error.message.contains("failed processing"));
    }

    #[tokio::test]
    async fn test_story_image_uses_stories_container() {
        let api = Arc::new(FakeInstagram::new(vec![]));
        let outcomes = publisher(api.clone(), 20)
            .publish(
                &[target("ig1", PostType::Story)],
                &[image("a")],
                &NullProgress,
            )
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(outcomes.successful[0].post_type, Some(PostType::Story));
        assert!(api.calls().contains(&Call::Create {
            media_type: Some("STORIES".to_string()),
            is_child: false,
            children: 0
        }));
        assert_eq!(api.status_checks(), 0);
    }

    #[tokio::test]
    async fn test_story_video_polls() {
        let api = Arc::new(FakeInstagram::new(vec![ContainerState::Ready]));
        let outcomes = publisher(api.clone(), 20)
            .publish(
                &[target("ig1", PostType::Story)],
                &[video("v")],
                &NullProgress,
            )
            .await;

        assert_eq!(outcomes.successful.len(), 1);
        assert_eq!(api.status_checks(), 1);
    }

    #[tokio::test]
    async fn test_feed_and_story_are_distinct_destinations() {
        let api = Arc::new(FakeInstagram::new(vec![]));
        let outcomes = publisher(api.clone(), 20)
            .publish(
                &[target("ig1", PostType::Post), target("ig1", PostType::Story)],
                &[image("a")],
                &NullProgress,
            )
            .await;

        assert_eq!(outcomes.successful.len(), 2);
        let post_types: Vec<_> = outcomes
            .successful
            .iter()
            .map(|s| s.post_type)
            .collect();
        assert!(post_types.contains(&Some(PostType::Post)));
        assert!(post_types.contains(&Some(PostType::Story)));
    }

    #[tokio::test]
    async fn test_feed_without_media_fails_destination() {
        let api = Arc::new(FakeInstagram::new(vec![]));
        let outcomes = publisher(api.clone(), 20)
            .publish(&[target("ig1", PostType::Post)], &[], &NullProgress)
            .await;

        assert_eq!(outcomes.failed.len(), 1);
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_state_from_status_code() {
        assert_eq!(
            ContainerState::from_status_code("FINISHED"),
            ContainerState::Ready
        );
        assert_eq!(
            ContainerState::from_status_code("PUBLISHED"),
            ContainerState::Ready
        );
        assert_eq!(
            ContainerState::from_status_code("IN_PROGRESS"),
            ContainerState::Processing
        );
        assert_eq!(
            ContainerState::from_status_code("ERROR"),
            ContainerState::Failed
        );
        assert_eq!(
            ContainerState::from_status_code("EXPIRED"),
            ContainerState::Failed
        );
        assert_eq!(
            ContainerState::from_status_code(""),
            ContainerState::Created
        );
    }
}
