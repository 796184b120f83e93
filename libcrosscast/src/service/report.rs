//! Report persistence
//!
//! Every publish attempt leaves one row behind: what was asked, the line
//! by line transcript of what happened, the final status, and a compact
//! per-destination summary. Persistence is strictly best-effort; a
//! storage failure is logged and never surfaces to the caller, because a
//! publish that reached the platforms must not be reported as failed over
//! a bookkeeping error.

use std::sync::Arc;

use tracing::warn;

use crate::db::Database;
use crate::types::{DestinationSummary, OutcomeSet, ReportRecord, ReportStatus};

/// Accumulates the human-readable transcript for one publish.
///
/// Lines are mirrored into `tracing` as they are appended so the live
/// logs and the persisted report tell the same story.
#[derive(Debug, Default)]
pub struct ReportLog {
    lines: Vec<String>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{line}");
        self.lines.push(line);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The transcript as persisted: lines joined with newlines.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct ReportService {
    db: Arc<Database>,
}

impl ReportService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist one publish attempt. Returns the row id when the write
    /// succeeded; `None` means the write failed and was logged.
    pub async fn record(
        &self,
        user_id: i64,
        content: &str,
        log: &ReportLog,
        status: ReportStatus,
        outcomes: &OutcomeSet,
    ) -> Option<i64> {
        let destinations: Vec<DestinationSummary> = outcomes.summaries();

        let record = ReportRecord {
            id: None,
            user_id,
            content: content.to_string(),
            publish_report: log.render(),
            publish_status: status,
            publish_destinations: destinations,
            created_at: chrono::Utc::now().timestamp(),
        };

        match self.db.insert_report(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id, error = %e, "failed to persist publish report");
                None
            }
        }
    }

    /// Recent reports for a user, newest first.
    pub async fn recent_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> crate::error::Result<Vec<ReportRecord>> {
        self.db.recent_reports_for_user(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    async fn service() -> (ReportService, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        (ReportService::new(db.clone()), db)
    }

    fn outcomes_with_one_success() -> OutcomeSet {
        let mut outcomes = OutcomeSet::default();
        outcomes.record_success(Platform::X, "alice", None, "p1");
        outcomes
    }

    #[tokio::test]
    async fn test_record_persists_transcript_and_summaries() {
        let (service, db) = service().await;

        let mut log = ReportLog::new();
        log.push("Publishing to 1 destination");
        log.push("x/alice: published p1");

        let id = service
            .record(
                7,
                "hello world",
                &log,
                ReportStatus::Success,
                &outcomes_with_one_success(),
            )
            .await
            .unwrap();

        let report = db.get_report(id).await.unwrap().unwrap();
        assert_eq!(report.user_id, 7);
        assert_eq!(report.content, "hello world");
        assert_eq!(
            report.publish_report,
            "Publishing to 1 destination\nx/alice: published p1"
        );
        assert_eq!(report.publish_status, ReportStatus::Success);
        assert_eq!(report.publish_destinations.len(), 1);
        assert_eq!(report.publish_destinations[0].account_id, "alice");
        assert!(report.publish_destinations[0].success);
    }

    #[tokio::test]
    async fn test_record_with_empty_outcomes_still_writes_row() {
        let (service, db) = service().await;

        let mut log = ReportLog::new();
        log.push("Publish aborted: cannot mix images and videos");

        let id = service
            .record(
                7,
                "mixed",
                &log,
                ReportStatus::Failed,
                &OutcomeSet::default(),
            )
            .await
            .unwrap();

        let report = db.get_report(id).await.unwrap().unwrap();
        assert_eq!(report.publish_status, ReportStatus::Failed);
        assert!(report.publish_destinations.is_empty());
    }

    #[tokio::test]
    async fn test_recent_for_user_reads_back() {
        let (service, _db) = service().await;

        for i in 0..3 {
            let log = ReportLog::new();
            service
                .record(
                    7,
                    &format!("post {i}"),
                    &log,
                    ReportStatus::Success,
                    &outcomes_with_one_success(),
                )
                .await
                .unwrap();
        }

        let reports = service.recent_for_user(7, 2).await.unwrap();
        assert_eq!(reports.len(), 2);

        let none_for_other_user = service.recent_for_user(8, 10).await.unwrap();
        assert!(none_for_other_user.is_empty());
    }

    #[test]
    fn test_report_log_render() {
        let mut log = ReportLog::new();
        assert!(log.is_empty());
        assert_eq!(log.render(), "");

        log.push("first");
        log.push("second");
        assert_eq!(log.render(), "first\nsecond");
    }
}
