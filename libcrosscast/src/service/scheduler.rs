//! Scheduled post drain
//!
//! Scheduled posts sit in the database as already-validated requests until
//! an external scheduler hits the drain webhook. Draining replays each due
//! post through the orchestrator and moves it to a terminal status, so a
//! post is attempted at most once no matter how often the webhook fires.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::service::events::EventBus;
use crate::service::report::ReportLog;
use crate::types::{PublishRequest, ReportStatus, ScheduleStatus, ScheduledPost};

/// What one drain pass did. `processed` counts every due post, including
/// ones that aborted before fan-out.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct SchedulerService {
    db: Arc<Database>,
    orchestrator: Arc<Orchestrator>,
}

impl SchedulerService {
    pub fn new(db: Arc<Database>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { db, orchestrator }
    }

    /// Store a post for a later drain pass.
    pub async fn schedule(&self, post: &ScheduledPost) -> Result<i64> {
        self.db.create_scheduled_post(post).await
    }

    /// Publish every pending post whose time has come.
    ///
    /// A post counts as succeeded when its publish reached at least one
    /// destination; total failures and pre-fan-out aborts mark it failed.
    /// Either way the row leaves `pending`, so reruns never double-post.
    pub async fn drain_due(&self) -> Result<DrainSummary> {
        let now = Utc::now().timestamp();
        let due = self.db.due_scheduled_posts(now).await?;
        let mut summary = DrainSummary::default();

        for post in due {
            let Some(id) = post.id else { continue };
            summary.processed += 1;

            let request = PublishRequest {
                user_id: post.user_id,
                text: post.text,
                media: post.media,
                destinations: post.destinations,
            };
            // No subscriber listens to a drain; the bus exists because the
            // orchestrator reports progress through one unconditionally.
            let bus = EventBus::default();
            let succeeded = match self
                .orchestrator
                .publish_request(request, ReportLog::new(), &bus)
                .await
            {
                Ok(outcome) => outcome.status != ReportStatus::Failed,
                Err(abort) => {
                    warn!(post_id = id, error = %abort.error, "scheduled publish aborted");
                    false
                }
            };

            let status = if succeeded {
                summary.succeeded += 1;
                ScheduleStatus::Published
            } else {
                summary.failed += 1;
                ScheduleStatus::Failed
            };
            self.db.update_scheduled_status(id, status).await?;
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "scheduled drain complete"
            );
        }
        Ok(summary)
    }
}
