//! Mock publisher for testing
//!
//! A configurable publisher that scripts per-destination outcomes without
//! touching the network. Integration tests use it to drive the
//! orchestrator through success, partial-failure, and total-failure
//! scenarios and to verify what each platform was asked to publish.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::PlatformError;
use crate::platforms::{PlatformPublisher, ProgressAction, ProgressSink, PublishTarget};
use crate::types::{MediaFile, OutcomeSet, Platform, PostType};

/// One recorded publish call for a single destination.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub account_id: String,
    pub post_type: Option<PostType>,
    pub text: String,
    pub media_count: usize,
}

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockPublisherConfig {
    /// Which platform this mock stands in for
    pub platform: Platform,

    /// Account ids that should fail; everything else succeeds
    pub failing_accounts: Vec<String>,

    /// When set, every destination fails with this message
    pub fail_all: Option<String>,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    /// Number of times publish has been called
    pub call_count: Arc<Mutex<usize>>,

    /// Every destination publish seen, in order
    pub published: Arc<Mutex<Vec<RecordedPublish>>>,
}

impl MockPublisherConfig {
    fn new(platform: Platform) -> Self {
        Self {
            platform,
            failing_accounts: Vec::new(),
            fail_all: None,
            delay: Duration::from_millis(0),
            call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
pub struct MockPublisher {
    config: MockPublisherConfig,
}

impl MockPublisher {
    pub fn new(config: MockPublisherConfig) -> Self {
        Self { config }
    }

    /// A mock where every destination succeeds.
    pub fn success(platform: Platform) -> Self {
        Self::new(MockPublisherConfig::new(platform))
    }

    /// A mock where every destination fails with the given message.
    pub fn failure(platform: Platform, error: &str) -> Self {
        Self::new(MockPublisherConfig {
            fail_all: Some(error.to_string()),
            ..MockPublisherConfig::new(platform)
        })
    }

    /// A mock where only the named accounts fail.
    pub fn failing_accounts(platform: Platform, accounts: &[&str]) -> Self {
        Self::new(MockPublisherConfig {
            failing_accounts: accounts.iter().map(|a| a.to_string()).collect(),
            ..MockPublisherConfig::new(platform)
        })
    }

    /// A mock with simulated latency.
    pub fn with_delay(platform: Platform, delay: Duration) -> Self {
        Self::new(MockPublisherConfig {
            delay,
            ..MockPublisherConfig::new(platform)
        })
    }

    /// Number of times publish was called.
    pub fn call_count(&self) -> usize {
        *self.config.call_count.lock().unwrap()
    }

    /// Everything published through this mock, in order.
    pub fn published(&self) -> Vec<RecordedPublish> {
        self.config.published.lock().unwrap().clone()
    }

    /// Shared handles for inspecting calls after the publisher is moved
    /// into an orchestrator.
    pub fn handles(&self) -> (Arc<Mutex<usize>>, Arc<Mutex<Vec<RecordedPublish>>>) {
        (
            self.config.call_count.clone(),
            self.config.published.clone(),
        )
    }
}

#[async_trait]
impl PlatformPublisher for MockPublisher {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    async fn publish(
        &self,
        targets: &[PublishTarget],
        media: &[MediaFile],
        progress: &dyn ProgressSink,
    ) -> OutcomeSet {
        *self.config.call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let mut outcomes = OutcomeSet::default();
        for target in targets {
            progress.destination_update(
                self.config.platform,
                ProgressAction::Starting,
                &target.account.display_name,
            );
            self.config
                .published
                .lock()
                .unwrap()
                .push(RecordedPublish {
                    account_id: target.account.account_id.clone(),
                    post_type: target.post_type,
                    text: target.text.clone(),
                    media_count: media.len(),
                });

            let should_fail = self.config.fail_all.is_some()
                || self
                    .config
                    .failing_accounts
                    .contains(&target.account.account_id);
            if should_fail {
                let message = self
                    .config
                    .fail_all
                    .clone()
                    .unwrap_or_else(|| "mock publish failed".to_string());
                let error = PlatformError::api(message);
                outcomes.record_failure(
                    self.config.platform,
                    &target.account.account_id,
                    target.post_type,
                    &error,
                );
            } else {
                let post_id = format!(
                    "{}:mock-{}",
                    self.config.platform.as_str(),
                    uuid::Uuid::new_v4()
                );
                outcomes.record_success(
                    self.config.platform,
                    &target.account.account_id,
                    target.post_type,
                    post_id,
                );
            }

            progress.destination_update(
                self.config.platform,
                ProgressAction::from_success(!should_fail),
                &target.account.display_name,
            );
        }
        outcomes
    }
}
