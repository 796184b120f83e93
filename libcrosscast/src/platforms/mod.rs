//! Platform publisher abstraction and implementations
//!
//! This module provides a unified trait for publishing to the supported
//! networks. Each publisher receives every resolved destination for its
//! platform plus the normalized media set, and reports one success or
//! failure per destination. A publisher never fails as a whole; errors
//! are folded into the returned outcome set so one bad page or channel
//! cannot sink the rest of the fan-out.
//!
//! # Example
//!
//! ```no_run
//! use libcrosscast::platforms::{PlatformPublisher, NullProgress};
//!
//! # async fn example(publisher: &dyn PlatformPublisher) {
//! let outcomes = publisher.publish(&[], &[], &NullProgress).await;
//! println!(
//!     "{}: {} ok, {} failed",
//!     publisher.platform(),
//!     outcomes.successful.len(),
//!     outcomes.failed.len()
//! );
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tokens::ResolvedAccount;
use crate::types::{MediaFile, OutcomeSet, Platform, PostType, ResourceType};

pub mod facebook;
pub mod instagram;
pub mod telegram;
pub mod x;

// Mock publisher is available for all builds (not just tests) to support
// integration tests in dependent crates
pub mod mock;

pub use facebook::FacebookPublisher;
pub use instagram::InstagramPublisher;
pub use telegram::TelegramPublisher;
pub use x::XPublisher;

/// One destination handed to a publisher: the resolved account, the
/// requested surface, and the text for this destination (already rewritten
/// when the destination has a rewrite rule).
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub account: ResolvedAccount,
    pub post_type: Option<PostType>,
    pub text: String,
}

/// What just happened to one destination. These strings go out on the
/// wire in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressAction {
    Starting,
    Completed,
    Failed,
}

impl ProgressAction {
    pub fn from_success(success: bool) -> Self {
        if success {
            ProgressAction::Completed
        } else {
            ProgressAction::Failed
        }
    }
}

/// Per-destination progress callback invoked as each destination starts
/// and again as it finishes. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn destination_update(&self, platform: Platform, action: ProgressAction, account_name: &str);
}

/// Sink that discards progress callbacks. Used by batch and scheduled
/// publishes where nobody is watching.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn destination_update(&self, _platform: Platform, _action: ProgressAction, _account_name: &str) {
    }
}

/// Publisher trait for fanning one publish out to a platform's destinations
///
/// Implementations receive all targets for their platform at once so they
/// can choose their own concurrency: Facebook and Instagram treat pages and
/// accounts independently, X posts per account after sequential media
/// uploads, Telegram sends channel by channel.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    /// The platform this publisher serves
    fn platform(&self) -> Platform;

    /// Publish to every target, recording one outcome per destination
    ///
    /// Calls `progress.destination_update` as each target starts and again
    /// as it completes or fails. This method does not return an error:
    /// per-destination failures land in `OutcomeSet::failed` with the
    /// platform's error detail attached.
    async fn publish(
        &self,
        targets: &[PublishTarget],
        media: &[MediaFile],
        progress: &dyn ProgressSink,
    ) -> OutcomeSet;
}

/// Split normalized media into image and video slices, preserving order.
pub(crate) fn split_media(media: &[MediaFile]) -> (Vec<&MediaFile>, Vec<&MediaFile>) {
    let mut images = Vec::new();
    let mut videos = Vec::new();
    for file in media {
        match file.asset.resource_type {
            ResourceType::Image => images.push(file),
            ResourceType::Video => videos.push(file),
        }
    }
    (images, videos)
}
