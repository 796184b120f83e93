//! Publish orchestration
//!
//! Drives one publish attempt end to end: validation, media-mix
//! precondition, media normalization, token resolution, per-destination
//! content transformation, and the concurrent per-platform fan-out.
//! Everything before the fan-out aborts the whole request; everything
//! inside it is contained to its destination. Every attempt, aborted or
//! not, leaves a persisted report behind.
//!
//! Lifecycle and progress events go out on the [`EventBus`] handed to each
//! call. Emission is fire-and-forget: an unsubscribed bus gives batch
//! callers identical results.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::error::{CrosscastError, PublishAbort};
use crate::media::MediaPipeline;
use crate::platforms::{PlatformPublisher, PublishTarget};
use crate::service::events::{EventBus, ProgressBroadcast, PublishEvent, PublishStep};
use crate::service::report::{ReportLog, ReportService};
use crate::tokens::TokenResolver;
use crate::transform::ContentTransformer;
use crate::types::{OutcomeSet, Platform, PublishRequest, ReportStatus};
use crate::validate::{ensure_unmixed, validate_request, RawPublishRequest};

/// The terminal result of one publish attempt that reached the fan-out.
#[derive(Debug)]
pub struct PublishOutcome {
    pub status: ReportStatus,
    pub outcomes: OutcomeSet,
    /// The persisted transcript, joined with newlines.
    pub transcript: String,
    /// Audit row id, `None` when the report write failed (warn-logged).
    pub report_id: Option<i64>,
}

pub struct Orchestrator {
    media: MediaPipeline,
    tokens: TokenResolver,
    transformer: ContentTransformer,
    publishers: Vec<Arc<dyn PlatformPublisher>>,
    reports: ReportService,
}

impl Orchestrator {
    pub fn new(
        media: MediaPipeline,
        tokens: TokenResolver,
        transformer: ContentTransformer,
        publishers: Vec<Arc<dyn PlatformPublisher>>,
        reports: ReportService,
    ) -> Self {
        Self {
            media,
            tokens,
            transformer,
            publishers,
            reports,
        }
    }

    /// Validate a raw wire request and publish it.
    pub async fn publish(
        &self,
        user_id: i64,
        raw: &RawPublishRequest,
        bus: &EventBus,
    ) -> std::result::Result<PublishOutcome, PublishAbort> {
        let log = ReportLog::new();
        bus.emit(PublishEvent::step(PublishStep::Validating));

        let content = raw.text.clone().unwrap_or_default();
        let request = match validate_request(user_id, raw) {
            Ok(request) => request,
            Err(error) => return Err(self.abort(user_id, &content, log, error, bus).await),
        };

        self.publish_request(request, log, bus).await
    }

    /// Publish an already-normalized request (the scheduled-drain path).
    /// Walks steps (1)–(7): media mix, media pipeline, token resolution,
    /// transform, concurrent fan-out, merge, classify-and-persist.
    pub async fn publish_request(
        &self,
        request: PublishRequest,
        mut log: ReportLog,
        bus: &EventBus,
    ) -> std::result::Result<PublishOutcome, PublishAbort> {
        let total = request.destinations.len();
        log.push(format!(
            "Publishing to {} destination(s) for user {}",
            total, request.user_id
        ));

        if let Err(error) = ensure_unmixed(&request.media) {
            return Err(self.abort(request.user_id, &request.text, log, error, bus).await);
        }

        // (3) Normalize media. Bytes are downloaded only when a raw-bytes
        // platform is among the destinations.
        bus.emit(PublishEvent::step(PublishStep::PreparingMedia));
        let download = request
            .destinations
            .iter()
            .any(|d| d.platform.needs_raw_media());
        let normalized = self.media.normalize(&request.media, download).await;
        for error in &normalized.errors {
            log.push(format!("Media download failed, skipping: {}", error));
        }
        if normalized.all_failed() {
            let error = CrosscastError::Precondition(format!(
                "all {} media downloads failed",
                normalized.errors.len()
            ));
            return Err(self.abort(request.user_id, &request.text, log, error, bus).await);
        }

        // (4) Resolve every destination or nothing.
        bus.emit(PublishEvent::step(PublishStep::Authenticating));
        let tokens = match self.tokens.resolve(&request).await {
            Ok(tokens) => tokens,
            Err(error) => {
                return Err(self.abort(request.user_id, &request.text, log, error, bus).await)
            }
        };
        log.push(format!("Resolved credentials for {} destination(s)", total));

        // Per-destination text, transformed concurrently. A failed rewrite
        // degrades to the original text inside the transformer.
        let texts: Vec<String> = join_all(request.destinations.iter().map(|dest| {
            self.transformer.content_for(
                request.user_id,
                dest.platform,
                &dest.account_id,
                &request.text,
            )
        }))
        .await;

        let mut targets: HashMap<Platform, Vec<PublishTarget>> = HashMap::new();
        for (dest, text) in request.destinations.iter().zip(texts) {
            // The resolver admitted every destination, so the lookup holds.
            if let Some(account) = tokens.get(dest.platform, &dest.account_id) {
                targets.entry(dest.platform).or_default().push(PublishTarget {
                    account: account.clone(),
                    post_type: dest.post_type,
                    text,
                });
            }
        }

        // (5) One publisher call per platform with destinations, all
        // launched together and awaited together.
        bus.emit(PublishEvent::step(PublishStep::Publishing));
        let progress = ProgressBroadcast::new(bus.clone(), total);
        let calls: Vec<_> = self
            .publishers
            .iter()
            .filter_map(|publisher| {
                targets
                    .remove(&publisher.platform())
                    .map(|targets| (publisher, targets))
            })
            .collect();

        let files = normalized.files;
        let results = join_all(calls.iter().map(|(publisher, targets)| {
            let progress = &progress;
            let files = &files;
            async move { publisher.publish(targets, files, progress).await }
        }))
        .await;

        // (6) Order-independent merge; `calls` follows the publisher list,
        // so the merged ordering never depends on completion order.
        let mut outcomes = OutcomeSet::new();
        for set in results {
            outcomes.merge(set);
        }
        for success in &outcomes.successful {
            log.push(format!(
                "{}/{}: published {}",
                success.platform, success.account_id, success.platform_post_id
            ));
        }
        for failure in &outcomes.failed {
            log.push(format!(
                "{}/{}: failed: {}",
                failure.platform, failure.account_id, failure.error.message
            ));
        }

        // (7) Status is a pure function of the counts.
        bus.emit(PublishEvent::step(PublishStep::Finalizing));
        let status = outcomes.status();
        log.push(format!(
            "Publish finished: {} succeeded, {} failed ({})",
            outcomes.successful.len(),
            outcomes.failed.len(),
            status
        ));

        let report_id = self
            .reports
            .record(request.user_id, &request.text, &log, status, &outcomes)
            .await;

        bus.emit(PublishEvent::Complete {
            status,
            message: format!(
                "Published to {} of {} destination(s)",
                outcomes.successful.len(),
                outcomes.total()
            ),
            successful: outcomes.successful.clone(),
            failed: outcomes.failed.clone(),
        });
        info!(
            user_id = request.user_id,
            %status,
            successful = outcomes.successful.len(),
            failed = outcomes.failed.len(),
            "publish complete"
        );

        Ok(PublishOutcome {
            status,
            outcomes,
            transcript: log.render(),
            report_id,
        })
    }

    /// Abort before fan-out: persist a zero-destination report, emit the
    /// error event, and hand the caller the error plus transcript.
    async fn abort(
        &self,
        user_id: i64,
        content: &str,
        mut log: ReportLog,
        error: CrosscastError,
        bus: &EventBus,
    ) -> PublishAbort {
        log.push(format!("Publish aborted: {}", error));
        let report_id = self
            .reports
            .record(user_id, content, &log, ReportStatus::Failed, &OutcomeSet::new())
            .await;

        bus.emit(PublishEvent::Error {
            message: error.to_string(),
            details: error.details(),
        });

        PublishAbort {
            error,
            transcript: log.render(),
            report_id,
        }
    }
}
