//! Request validation
//!
//! Turns the inbound wire shape into a normalized [`PublishRequest`] or a
//! 400-class error, and checks the media mix precondition. Validation is
//! pure: no clock, no network, no store access, and running a normalized
//! request through it again yields the same result.

use serde::Deserialize;
use tracing::debug;

use crate::error::{CrosscastError, Result};
use crate::types::{Destination, MediaAsset, Platform, PublishRequest};

/// Inbound request body. Destination arrays default to empty when omitted;
/// a field of the wrong shape fails body parsing upstream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPublishRequest {
    pub text: Option<String>,
    pub facebook_pages: Vec<String>,
    pub x_accounts: Vec<String>,
    pub instagram_publish_accounts: Vec<String>,
    pub instagram_story_accounts: Vec<String>,
    pub telegram_channels: Vec<String>,
    /// Kept as raw values so one malformed entry drops without failing
    /// the whole request.
    pub cloudinary_media: Vec<serde_json::Value>,
}

/// Validate and normalize an inbound request.
///
/// Destination ids are trimmed, blanks dropped, exact duplicates removed in
/// first-seen order. Malformed media entries (missing required fields) are
/// dropped, not fatal. Errors:
/// - no destination at all
/// - neither text nor usable media
/// - an Instagram destination with no media
pub fn validate_request(user_id: i64, raw: &RawPublishRequest) -> Result<PublishRequest> {
    let mut destinations = Vec::new();
    collect_destinations(&raw.facebook_pages, Destination::facebook_page, &mut destinations);
    collect_destinations(&raw.x_accounts, Destination::x_account, &mut destinations);
    collect_destinations(
        &raw.instagram_publish_accounts,
        Destination::instagram_post,
        &mut destinations,
    );
    collect_destinations(
        &raw.instagram_story_accounts,
        Destination::instagram_story,
        &mut destinations,
    );
    collect_destinations(
        &raw.telegram_channels,
        Destination::telegram_channel,
        &mut destinations,
    );

    if destinations.is_empty() {
        return Err(CrosscastError::Validation(
            "at least one destination is required".to_string(),
        ));
    }

    let media = parse_media(&raw.cloudinary_media);

    let text = raw
        .text
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    if text.is_empty() && media.is_empty() {
        return Err(CrosscastError::Validation(
            "either text or media is required".to_string(),
        ));
    }

    if media.is_empty() && destinations.iter().any(|d| d.platform == Platform::Instagram) {
        return Err(CrosscastError::Validation(
            "Instagram destinations require at least one media item".to_string(),
        ));
    }

    Ok(PublishRequest {
        user_id,
        text,
        media,
        destinations,
    })
}

fn collect_destinations(
    ids: &[String],
    make: impl Fn(String) -> Destination,
    out: &mut Vec<Destination>,
) {
    for id in ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            continue;
        }
        let dest = make(trimmed.to_string());
        if !out.contains(&dest) {
            out.push(dest);
        }
    }
}

fn parse_media(values: &[serde_json::Value]) -> Vec<MediaAsset> {
    values
        .iter()
        .filter_map(|value| match serde_json::from_value::<MediaAsset>(value.clone()) {
            Ok(asset) if !asset.public_url.trim().is_empty() => Some(asset),
            Ok(asset) => {
                debug!(public_id = %asset.public_id, "dropping media entry with empty url");
                None
            }
            Err(err) => {
                debug!(error = %err, "dropping malformed media entry");
                None
            }
        })
        .collect()
}

/// Image/video counts for the media list. Mixing the two in one request is
/// a hard precondition failure checked before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMix {
    pub images: usize,
    pub videos: usize,
}

impl MediaMix {
    pub fn mixed(&self) -> bool {
        self.images > 0 && self.videos > 0
    }
}

pub fn check_media_mix(media: &[MediaAsset]) -> MediaMix {
    let images = media.iter().filter(|m| m.is_image()).count();
    let videos = media.iter().filter(|m| m.is_video()).count();
    MediaMix { images, videos }
}

/// Converts a mixed media list into the precondition error the batch
/// endpoint reports as 400.
pub fn ensure_unmixed(media: &[MediaAsset]) -> Result<MediaMix> {
    let mix = check_media_mix(media);
    if mix.mixed() {
        return Err(CrosscastError::Precondition(format!(
            "cannot mix images and videos in one publish ({} images, {} videos)",
            mix.images, mix.videos
        )));
    }
    Ok(mix)
}
