//! Core types for Crosscast

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

// ============================================================================
// Platforms and destinations
// ============================================================================

/// The closed set of publishing platforms. Dispatch always iterates
/// [`Platform::ALL`], so outcome ordering is deterministic regardless of
/// which call finishes first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    X,
    Instagram,
    Telegram,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Facebook,
        Platform::X,
        Platform::Instagram,
        Platform::Telegram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::X => "x",
            Platform::Instagram => "instagram",
            Platform::Telegram => "telegram",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Facebook => "Facebook",
            Platform::X => "X",
            Platform::Instagram => "Instagram",
            Platform::Telegram => "Telegram",
        }
    }

    /// Whether this platform's API consumes raw media bytes. URL-native
    /// platforms never cause the media pipeline to download anything.
    pub fn needs_raw_media(&self) -> bool {
        matches!(self, Platform::X)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Instagram distinguishes feed posts from stories; the other platforms
/// have a single post shape and carry no post type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Post,
    Story,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Post => "post",
            PostType::Story => "story",
        }
    }
}

/// One (platform, account id, optional post type) tuple. A single publish
/// request fans out to one attempt per destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub platform: Platform,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<PostType>,
}

impl Destination {
    pub fn facebook_page(account_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::Facebook,
            account_id: account_id.into(),
            post_type: None,
        }
    }

    pub fn x_account(account_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::X,
            account_id: account_id.into(),
            post_type: None,
        }
    }

    pub fn instagram_post(account_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::Instagram,
            account_id: account_id.into(),
            post_type: Some(PostType::Post),
        }
    }

    pub fn instagram_story(account_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::Instagram,
            account_id: account_id.into(),
            post_type: Some(PostType::Story),
        }
    }

    pub fn telegram_channel(account_id: impl Into<String>) -> Self {
        Self {
            platform: Platform::Telegram,
            account_id: account_id.into(),
            post_type: None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.post_type {
            Some(pt) => write!(f, "{}/{} ({})", self.platform, self.account_id, pt.as_str()),
            None => write!(f, "{}/{}", self.platform, self.account_id),
        }
    }
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
        }
    }
}

/// A media asset already hosted by the media service. Publishing references
/// the hosted `public_url`; raw bytes are fetched separately only for
/// platforms that require them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub public_id: String,
    pub public_url: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
}

impl MediaAsset {
    pub fn is_image(&self) -> bool {
        self.resource_type == ResourceType::Image
    }

    pub fn is_video(&self) -> bool {
        self.resource_type == ResourceType::Video
    }

    /// Best-effort MIME type from the asset's declared format.
    pub fn mime_type(&self) -> String {
        let kind = self.resource_type.as_str();
        match self.format.as_deref() {
            Some("jpg") => format!("{}/jpeg", kind),
            Some(fmt) => format!("{}/{}", kind, fmt),
            None => match self.resource_type {
                ResourceType::Image => "image/jpeg".to_string(),
                ResourceType::Video => "video/mp4".to_string(),
            },
        }
    }
}

/// Pipeline output for one asset. `bytes` is populated only when the
/// destination set includes a platform that uploads raw bytes.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub asset: MediaAsset,
    pub bytes: Option<Vec<u8>>,
}

impl MediaFile {
    pub fn url_only(asset: MediaAsset) -> Self {
        Self { asset, bytes: None }
    }

    pub fn url(&self) -> &str {
        &self.asset.public_url
    }

    pub fn is_image(&self) -> bool {
        self.asset.is_image()
    }

    pub fn is_video(&self) -> bool {
        self.asset.is_video()
    }
}

// ============================================================================
// Publish request
// ============================================================================

/// A validated, normalized publish request. Produced by the request
/// validator; everything downstream trusts its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRequest {
    pub user_id: i64,
    pub text: String,
    pub media: Vec<MediaAsset>,
    pub destinations: Vec<Destination>,
}

impl PublishRequest {
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    pub fn destinations_for(&self, platform: Platform) -> Vec<&Destination> {
        self.destinations
            .iter()
            .filter(|d| d.platform == platform)
            .collect()
    }

    pub fn has_platform(&self, platform: Platform) -> bool {
        self.destinations.iter().any(|d| d.platform == platform)
    }

    /// Account ids requested for a platform, deduplicated in first-seen
    /// order. Instagram feed and story destinations collapse to one id.
    pub fn account_ids_for(&self, platform: Platform) -> Vec<String> {
        let mut seen = Vec::new();
        for dest in self.destinations.iter().filter(|d| d.platform == platform) {
            if !seen.contains(&dest.account_id) {
                seen.push(dest.account_id.clone());
            }
        }
        seen
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Wire shape of a per-destination failure cause. Platform codes and raw
/// detail payloads pass through untranslated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&PlatformError> for OutcomeError {
    fn from(err: &PlatformError) -> Self {
        OutcomeError {
            message: err.to_string(),
            code: err.code().map(|c| c.to_string()),
            details: err.details().cloned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSuccess {
    pub platform: Platform,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<PostType>,
    pub platform_post_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationFailure {
    pub platform: Platform,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<PostType>,
    pub error: OutcomeError,
}

/// Accumulated per-destination outcomes for one publish attempt. Every
/// requested destination lands in exactly one of the two lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeSet {
    pub successful: Vec<DestinationSuccess>,
    pub failed: Vec<DestinationFailure>,
}

impl OutcomeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(
        &mut self,
        platform: Platform,
        account_id: impl Into<String>,
        post_type: Option<PostType>,
        platform_post_id: impl Into<String>,
    ) {
        self.successful.push(DestinationSuccess {
            platform,
            account_id: account_id.into(),
            post_type,
            platform_post_id: platform_post_id.into(),
        });
    }

    pub fn record_failure(
        &mut self,
        platform: Platform,
        account_id: impl Into<String>,
        post_type: Option<PostType>,
        error: &PlatformError,
    ) {
        self.failed.push(DestinationFailure {
            platform,
            account_id: account_id.into(),
            post_type,
            error: OutcomeError::from(error),
        });
    }

    /// Appends another set. Merging is append-only, so counts and the
    /// derived status never depend on completion order.
    pub fn merge(&mut self, other: OutcomeSet) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }

    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn status(&self) -> ReportStatus {
        ReportStatus::classify(self.successful.len(), self.failed.len())
    }

    pub fn summaries(&self) -> Vec<DestinationSummary> {
        let mut out: Vec<DestinationSummary> =
            self.successful.iter().map(DestinationSummary::from).collect();
        out.extend(self.failed.iter().map(DestinationSummary::from));
        out
    }
}

/// Aggregate status of a publish attempt. Derived purely from outcome
/// counts; a zero-destination attempt classifies as failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl ReportStatus {
    pub fn classify(successful: usize, failed: usize) -> Self {
        if failed == 0 && successful > 0 {
            ReportStatus::Success
        } else if successful > 0 {
            ReportStatus::PartialSuccess
        } else {
            ReportStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::PartialSuccess => "partial_success",
            ReportStatus::Failed => "failed",
        }
    }

    /// HTTP status the batch endpoint answers with for this outcome.
    pub fn http_status(&self) -> u16 {
        match self {
            ReportStatus::Success => 200,
            ReportStatus::PartialSuccess => 207,
            ReportStatus::Failed => 500,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compact per-destination record persisted in the report row's
/// destinations column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSummary {
    pub platform: Platform,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<PostType>,
    pub success: bool,
}

impl From<&DestinationSuccess> for DestinationSummary {
    fn from(s: &DestinationSuccess) -> Self {
        DestinationSummary {
            platform: s.platform,
            account_id: s.account_id.clone(),
            post_type: s.post_type,
            success: true,
        }
    }
}

impl From<&DestinationFailure> for DestinationSummary {
    fn from(f: &DestinationFailure) -> Self {
        DestinationSummary {
            platform: f.platform,
            account_id: f.account_id.clone(),
            post_type: f.post_type,
            success: false,
        }
    }
}

// ============================================================================
// Stored records
// ============================================================================

/// Connected account row. Written by the account-connection subsystem;
/// the engine only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: Option<i64>,
    pub user_id: i64,
    pub platform: Platform,
    pub account_id: String,
    pub display_name: String,
    pub credential: String,
    pub created_at: i64,
}

/// Optional per-destination rewrite instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    pub id: Option<i64>,
    pub user_id: i64,
    pub platform: Platform,
    pub account_id: String,
    pub instruction: String,
}

/// Persisted audit report for one publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: Option<i64>,
    pub user_id: i64,
    pub content: String,
    pub publish_report: String,
    pub publish_status: ReportStatus,
    pub publish_destinations: Vec<DestinationSummary>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Published,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Published => "published",
            ScheduleStatus::Failed => "failed",
        }
    }
}

/// A stored post waiting for the scheduled-drain webhook to pick it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: Option<i64>,
    pub user_id: i64,
    pub text: String,
    pub media: Vec<MediaAsset>,
    pub destinations: Vec<Destination>,
    pub scheduled_at: i64,
    pub status: ScheduleStatus,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_asset(id: &str) -> MediaAsset {
        MediaAsset {
            public_id: id.to_string(),
            public_url: format!("https://res.example.com/{}.jpg", id),
            resource_type: ResourceType::Image,
            format: Some("jpg".to_string()),
            width: Some(1080),
            height: Some(1080),
            original_filename: Some(format!("{}.jpg", id)),
        }
    }

    #[test]
    fn test_classify_all_success() {
        assert_eq!(ReportStatus::classify(3, 0), ReportStatus::Success);
        assert_eq!(ReportStatus::classify(1, 0), ReportStatus::Success);
    }

    #[test]
    fn test_classify_partial() {
        assert_eq!(ReportStatus::classify(1, 1), ReportStatus::PartialSuccess);
        assert_eq!(ReportStatus::classify(5, 2), ReportStatus::PartialSuccess);
    }

    #[test]
    fn test_classify_all_failed() {
        assert_eq!(ReportStatus::classify(0, 4), ReportStatus::Failed);
        assert_eq!(ReportStatus::classify(0, 1), ReportStatus::Failed);
    }

    #[test]
    fn test_classify_zero_destinations_is_failed() {
        // Early aborts persist a report with no outcomes at all.
        assert_eq!(ReportStatus::classify(0, 0), ReportStatus::Failed);
    }

    #[test]
    fn test_classify_depends_only_on_counts() {
        // Same counts, different construction paths, same status.
        let mut a = OutcomeSet::new();
        a.record_success(Platform::Facebook, "1", None, "p1");
        a.record_failure(
            Platform::X,
            "2",
            None,
            &PlatformError::Network("down".to_string()),
        );

        let mut b = OutcomeSet::new();
        b.record_failure(
            Platform::Telegram,
            "@c",
            None,
            &PlatformError::api("bad request"),
        );
        b.record_success(Platform::Instagram, "9", Some(PostType::Story), "s1");

        assert_eq!(a.status(), b.status());
        assert_eq!(a.status(), ReportStatus::PartialSuccess);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ReportStatus::Success.http_status(), 200);
        assert_eq!(ReportStatus::PartialSuccess.http_status(), 207);
        assert_eq!(ReportStatus::Failed.http_status(), 500);
    }

    #[test]
    fn test_merge_is_order_independent_for_status() {
        let mut left = OutcomeSet::new();
        left.record_success(Platform::Facebook, "1", None, "a");
        let mut right = OutcomeSet::new();
        right.record_failure(
            Platform::X,
            "2",
            None,
            &PlatformError::RateLimit("429".to_string()),
        );

        let mut forward = OutcomeSet::new();
        forward.merge(left.clone());
        forward.merge(right.clone());

        let mut backward = OutcomeSet::new();
        backward.merge(right);
        backward.merge(left);

        assert_eq!(forward.status(), backward.status());
        assert_eq!(forward.total(), backward.total());
    }

    #[test]
    fn test_outcome_error_preserves_platform_code() {
        let err = PlatformError::Api {
            message: "Invalid OAuth access token".to_string(),
            code: Some("190".to_string()),
            details: Some(serde_json::json!({"type": "OAuthException"})),
        };
        let outcome = OutcomeError::from(&err);
        assert_eq!(outcome.message, "Invalid OAuth access token");
        assert_eq!(outcome.code.as_deref(), Some("190"));
        assert_eq!(outcome.details.unwrap()["type"], "OAuthException");
    }

    #[test]
    fn test_outcome_error_without_code() {
        let err = PlatformError::Network("connection reset".to_string());
        let outcome = OutcomeError::from(&err);
        assert_eq!(outcome.message, "Network error: connection reset");
        assert!(outcome.code.is_none());
        assert!(outcome.details.is_none());
    }

    #[test]
    fn test_platform_serialization_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&Platform::Facebook).unwrap(),
            "\"facebook\""
        );
        assert_eq!(serde_json::to_string(&Platform::X).unwrap(), "\"x\"");
    }

    #[test]
    fn test_only_x_needs_raw_media() {
        for platform in Platform::ALL {
            assert_eq!(platform.needs_raw_media(), platform == Platform::X);
        }
    }

    #[test]
    fn test_destination_constructors() {
        let story = Destination::instagram_story("17841400000000000");
        assert_eq!(story.platform, Platform::Instagram);
        assert_eq!(story.post_type, Some(PostType::Story));

        let page = Destination::facebook_page("123456");
        assert_eq!(page.platform, Platform::Facebook);
        assert!(page.post_type.is_none());
        assert_eq!(format!("{}", page), "facebook/123456");
        assert_eq!(
            format!("{}", story),
            "instagram/17841400000000000 (story)"
        );
    }

    #[test]
    fn test_media_asset_wire_shape() {
        let json = r#"{
            "publicId": "folder/cat",
            "publicUrl": "https://res.example.com/folder/cat.jpg",
            "resourceType": "image",
            "format": "jpg",
            "width": 800,
            "height": 600,
            "originalFilename": "cat.jpg"
        }"#;
        let asset: MediaAsset = serde_json::from_str(json).unwrap();
        assert_eq!(asset.public_id, "folder/cat");
        assert!(asset.is_image());
        assert_eq!(asset.mime_type(), "image/jpeg");
    }

    #[test]
    fn test_media_asset_optional_fields_default() {
        let json = r#"{
            "publicId": "clip",
            "publicUrl": "https://res.example.com/clip.mp4",
            "resourceType": "video"
        }"#;
        let asset: MediaAsset = serde_json::from_str(json).unwrap();
        assert!(asset.is_video());
        assert!(asset.format.is_none());
        assert_eq!(asset.mime_type(), "video/mp4");
    }

    #[test]
    fn test_account_ids_dedup_instagram_post_and_story() {
        let request = PublishRequest {
            user_id: 1,
            text: "hello".to_string(),
            media: vec![image_asset("a")],
            destinations: vec![
                Destination::instagram_post("ig1"),
                Destination::instagram_story("ig1"),
                Destination::instagram_post("ig2"),
            ],
        };
        assert_eq!(
            request.account_ids_for(Platform::Instagram),
            vec!["ig1".to_string(), "ig2".to_string()]
        );
    }

    #[test]
    fn test_success_wire_field_names() {
        let mut set = OutcomeSet::new();
        set.record_success(Platform::Facebook, "123", None, "123_456");
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["successful"][0]["accountId"], "123");
        assert_eq!(json["successful"][0]["platformPostId"], "123_456");
        assert!(json["successful"][0].get("postType").is_none());
    }

    #[test]
    fn test_failure_wire_field_names() {
        let mut set = OutcomeSet::new();
        set.record_failure(
            Platform::Instagram,
            "ig1",
            Some(PostType::Story),
            &PlatformError::api("media expired"),
        );
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["failed"][0]["postType"], "story");
        assert_eq!(json["failed"][0]["error"]["message"], "media expired");
    }

    #[test]
    fn test_summaries_cover_both_halves() {
        let mut set = OutcomeSet::new();
        set.record_success(Platform::Facebook, "1", None, "p");
        set.record_failure(
            Platform::Telegram,
            "@c",
            None,
            &PlatformError::Network("down".to_string()),
        );
        let summaries = set.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().any(|s| s.success));
        assert!(summaries.iter().any(|s| !s.success));
    }

    #[test]
    fn test_report_status_db_strings() {
        assert_eq!(ReportStatus::Success.as_str(), "success");
        assert_eq!(ReportStatus::PartialSuccess.as_str(), "partial_success");
        assert_eq!(ReportStatus::Failed.as_str(), "failed");
    }
}
