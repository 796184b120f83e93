//! Database operations for Crosscast

use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::Result;
use crate::types::{
    ConnectedAccount, DestinationSummary, Platform, ReportRecord, ReportStatus, RewriteRule,
    ScheduleStatus, ScheduledPost,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Connect to an in-memory database (tests and one-shot tools)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Connected accounts
    // ========================================================================

    /// Fetch the connected accounts matching the requested ids for one
    /// platform. Ids with no row are simply absent from the result; the
    /// caller computes the missing set.
    pub async fn get_accounts(
        &self,
        user_id: i64,
        platform: Platform,
        account_ids: &[String],
    ) -> Result<Vec<ConnectedAccount>> {
        use sqlx::Row;

        if account_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; account_ids.len()].join(", ");
        let query_str = format!(
            r#"
            SELECT id, user_id, account_id, display_name, credential, created_at
            FROM connected_accounts
            WHERE user_id = ? AND platform = ? AND account_id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&query_str).bind(user_id).bind(platform.as_str());
        for account_id in account_ids {
            query = query.bind(account_id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ConnectedAccount {
                id: r.get("id"),
                user_id: r.get("user_id"),
                platform,
                account_id: r.get("account_id"),
                display_name: r.get("display_name"),
                credential: r.get("credential"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Insert or replace a connected account (connection flows and tests)
    pub async fn upsert_account(&self, account: &ConnectedAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connected_accounts (user_id, platform, account_id, display_name, credential, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform, account_id)
            DO UPDATE SET display_name = excluded.display_name, credential = excluded.credential
            "#,
        )
        .bind(account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.account_id)
        .bind(&account.display_name)
        .bind(&account.credential)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Rewrite rules
    // ========================================================================

    pub async fn get_rewrite_rule(
        &self,
        user_id: i64,
        platform: Platform,
        account_id: &str,
    ) -> Result<Option<RewriteRule>> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, account_id, instruction
            FROM rewrite_rules
            WHERE user_id = ? AND platform = ? AND account_id = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| RewriteRule {
            id: r.get("id"),
            user_id: r.get("user_id"),
            platform,
            account_id: r.get("account_id"),
            instruction: r.get("instruction"),
        }))
    }

    pub async fn upsert_rewrite_rule(&self, rule: &RewriteRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rewrite_rules (user_id, platform, account_id, instruction, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform, account_id)
            DO UPDATE SET instruction = excluded.instruction
            "#,
        )
        .bind(rule.user_id)
        .bind(rule.platform.as_str())
        .bind(&rule.account_id)
        .bind(&rule.instruction)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Publish reports
    // ========================================================================

    /// Persist one publish attempt's audit row, returning its id
    pub async fn insert_report(&self, report: &ReportRecord) -> Result<i64> {
        let destinations_json = serde_json::to_string(&report.publish_destinations)
            .unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO publish_reports (user_id, content, publish_report, publish_status, publish_destinations, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.user_id)
        .bind(&report.content)
        .bind(&report.publish_report)
        .bind(report.publish_status.as_str())
        .bind(destinations_json)
        .bind(report.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<ReportRecord>> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, content, publish_report, publish_status, publish_destinations, created_at
            FROM publish_reports WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| report_from_row(&r)))
    }

    pub async fn recent_reports_for_user(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<ReportRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, content, publish_report, publish_status, publish_destinations, created_at
            FROM publish_reports
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(report_from_row).collect())
    }

    // ========================================================================
    // Scheduled posts
    // ========================================================================

    pub async fn create_scheduled_post(&self, post: &ScheduledPost) -> Result<i64> {
        let media_json = serde_json::to_string(&post.media).unwrap_or_else(|_| "[]".to_string());
        let destinations_json =
            serde_json::to_string(&post.destinations).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_posts (user_id, text, media, destinations, scheduled_at, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.user_id)
        .bind(&post.text)
        .bind(media_json)
        .bind(destinations_json)
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Pending rows whose scheduled time has passed, oldest first
    pub async fn due_scheduled_posts(&self, now: i64) -> Result<Vec<ScheduledPost>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, text, media, destinations, scheduled_at, status, created_at
            FROM scheduled_posts
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ScheduledPost {
                id: r.get("id"),
                user_id: r.get("user_id"),
                text: r.get("text"),
                media: serde_json::from_str(&r.get::<String, _>("media")).unwrap_or_default(),
                destinations: serde_json::from_str(&r.get::<String, _>("destinations"))
                    .unwrap_or_default(),
                scheduled_at: r.get("scheduled_at"),
                status: schedule_status_from_str(&r.get::<String, _>("status")),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn update_scheduled_status(&self, id: i64, status: ScheduleStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = ? WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }
}

fn report_from_row(r: &sqlx::sqlite::SqliteRow) -> ReportRecord {
    use sqlx::Row;

    let destinations: Vec<DestinationSummary> =
        serde_json::from_str(&r.get::<String, _>("publish_destinations")).unwrap_or_default();

    ReportRecord {
        id: r.get("id"),
        user_id: r.get("user_id"),
        content: r.get("content"),
        publish_report: r.get("publish_report"),
        publish_status: match r.get::<String, _>("publish_status").as_str() {
            "success" => ReportStatus::Success,
            "partial_success" => ReportStatus::PartialSuccess,
            _ => ReportStatus::Failed,
        },
        publish_destinations: destinations,
        created_at: r.get("created_at"),
    }
}

fn schedule_status_from_str(s: &str) -> ScheduleStatus {
    match s {
        "published" => ScheduleStatus::Published,
        "failed" => ScheduleStatus::Failed,
        _ => ScheduleStatus::Pending,
    }
}
