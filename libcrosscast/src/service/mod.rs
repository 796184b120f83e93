//! Service layer for Crosscast
//!
//! The engine behind every delivery surface. `CrosscastService` is the
//! facade: it owns the shared resources (database, credential cache, event
//! bus) and wires the publish pipeline together from configuration. The
//! HTTP server holds exactly one of these.
//!
//! Sub-pieces:
//!
//! - [`crate::orchestrator::Orchestrator`]: the publish pipeline itself
//! - [`scheduler::SchedulerService`]: scheduled-post storage and drain
//! - [`report::ReportService`]: persisted audit reports
//! - [`events::EventBus`]: lifecycle and progress event distribution
//!
//! # Example
//!
//! ```no_run
//! use libcrosscast::service::CrosscastService;
//! use libcrosscast::validate::RawPublishRequest;
//!
//! # async fn example() -> libcrosscast::Result<()> {
//! let service = CrosscastService::new().await?;
//!
//! let raw = RawPublishRequest {
//!     text: Some("Hello from everywhere at once".to_string()),
//!     telegram_channels: vec!["@mychannel".to_string()],
//!     ..Default::default()
//! };
//!
//! match service.publish(1, &raw).await {
//!     Ok(outcome) => println!("{}", outcome.status),
//!     Err(abort) => eprintln!("{}", abort.error),
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod report;
pub mod scheduler;

pub use events::{EventBus, EventReceiver, ProgressBroadcast, PublishEvent, PublishStep};
pub use report::{ReportLog, ReportService};
pub use scheduler::{DrainSummary, SchedulerService};

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::db::Database;
use crate::error::{PublishAbort, Result};
use crate::media::{HttpMediaFetcher, MediaPipeline};
use crate::orchestrator::{Orchestrator, PublishOutcome};
use crate::platforms::{
    FacebookPublisher, InstagramPublisher, PlatformPublisher, TelegramPublisher, XPublisher,
};
use crate::tokens::{ResolvedAccount, TokenResolver};
use crate::transform::{ContentTransformer, HttpRewriter, Rewriter};
use crate::validate::RawPublishRequest;

/// Main service facade
///
/// Owns one database pool, one credential cache, and one event bus; the
/// orchestrator and sub-services all share them. Cheap to hold behind an
/// `Arc` and safe to use from concurrent request handlers.
pub struct CrosscastService {
    db: Arc<Database>,
    config: Arc<Config>,
    cache: Arc<TtlCache<ResolvedAccount>>,
    orchestrator: Arc<Orchestrator>,
    scheduler: SchedulerService,
    reports: ReportService,
    event_bus: EventBus,
}

impl CrosscastService {
    /// Create a service from configuration at the default location.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service from a pre-built [`Config`], running migrations.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database.path).await?);
        Self::with_database(config, db)
    }

    /// Wire the pipeline onto an existing database handle. Tests use this
    /// with [`Database::in_memory`].
    pub fn with_database(config: Config, db: Arc<Database>) -> Result<Self> {
        let config = Arc::new(config);
        let cache: Arc<TtlCache<ResolvedAccount>> = Arc::new(TtlCache::new());
        let event_bus = EventBus::new(100);

        let fetcher = HttpMediaFetcher::new(Duration::from_secs(
            config.media.download_timeout_secs,
        ))?;
        let media = MediaPipeline::new(Arc::new(fetcher));
        let tokens = TokenResolver::new(Arc::clone(&db), Arc::clone(&cache));
        let rewriter = HttpRewriter::from_config(&config.transform)
            .map(|r| Arc::new(r) as Arc<dyn Rewriter>);
        let transformer = ContentTransformer::new(Arc::clone(&db), rewriter);

        // Dispatch order is fixed; merged outcomes follow this order.
        let publishers: Vec<Arc<dyn PlatformPublisher>> = vec![
            Arc::new(FacebookPublisher::from_config(&config.facebook)?),
            Arc::new(XPublisher::from_config(&config.x)?),
            Arc::new(InstagramPublisher::from_config(&config.instagram)?),
            Arc::new(TelegramPublisher::from_config(&config.telegram)?),
        ];

        let orchestrator = Arc::new(Orchestrator::new(
            media,
            tokens,
            transformer,
            publishers,
            ReportService::new(Arc::clone(&db)),
        ));
        let scheduler = SchedulerService::new(Arc::clone(&db), Arc::clone(&orchestrator));
        let reports = ReportService::new(Arc::clone(&db));

        Ok(Self {
            db,
            config,
            cache,
            orchestrator,
            scheduler,
            reports,
            event_bus,
        })
    }

    /// Publish a raw request, emitting events on the shared bus.
    pub async fn publish(
        &self,
        user_id: i64,
        raw: &RawPublishRequest,
    ) -> std::result::Result<PublishOutcome, PublishAbort> {
        self.orchestrator.publish(user_id, raw, &self.event_bus).await
    }

    /// The publish pipeline. Streaming handlers call it with a bus of
    /// their own so each stream sees only its own publish.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &SchedulerService {
        &self.scheduler
    }

    pub fn reports(&self) -> &ReportService {
        &self.reports
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to events from publishes routed through [`Self::publish`].
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Drop expired credential cache entries. The server calls this from a
    /// periodic task; entries also expire lazily on read.
    pub fn sweep_credential_cache(&self) -> usize {
        self.cache.sweep_expired()
    }
}
