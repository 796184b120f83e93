//! Event system for publish progress
//!
//! An in-process broadcast bus carries lifecycle and progress events from
//! the orchestrator to whoever is watching, without ever blocking the
//! publish. The server's SSE endpoint subscribes one receiver per request;
//! batch publishes pass an unsubscribed bus so every emit is dropped on
//! the floor.
//!
//! # Non-Blocking Behavior
//!
//! If no subscribers exist, events are dropped immediately. Subscribers
//! can lag without blocking emitters; a lagging receiver loses the oldest
//! events first.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::platforms::{ProgressAction, ProgressSink};
use crate::types::{DestinationFailure, DestinationSuccess, Platform, ReportStatus};

/// Fixed number of lifecycle steps every publish walks through.
pub const TOTAL_STEPS: usize = 5;

/// The publish lifecycle, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStep {
    Validating,
    PreparingMedia,
    Authenticating,
    Publishing,
    Finalizing,
}

impl PublishStep {
    pub const ALL: [PublishStep; TOTAL_STEPS] = [
        PublishStep::Validating,
        PublishStep::PreparingMedia,
        PublishStep::Authenticating,
        PublishStep::Publishing,
        PublishStep::Finalizing,
    ];

    /// 1-based position in the lifecycle.
    pub fn index(&self) -> usize {
        match self {
            PublishStep::Validating => 1,
            PublishStep::PreparingMedia => 2,
            PublishStep::Authenticating => 3,
            PublishStep::Publishing => 4,
            PublishStep::Finalizing => 5,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PublishStep::Validating => "Validating request",
            PublishStep::PreparingMedia => "Preparing media",
            PublishStep::Authenticating => "Resolving destination accounts",
            PublishStep::Publishing => "Publishing to destinations",
            PublishStep::Finalizing => "Finalizing report",
        }
    }
}

/// Events emitted during a publish
///
/// Serialized field names are camelCase because these payloads go out on
/// the wire unchanged (SSE data frames).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PublishEvent {
    /// One of the five lifecycle steps began
    Status {
        step: PublishStep,
        message: String,
        step_index: usize,
        total_steps: usize,
    },

    /// A destination started, completed, or failed
    Progress {
        platform: Platform,
        action: ProgressAction,
        account_name: String,
        current: usize,
        total: usize,
    },

    /// The publish finished and the report is persisted. Carries the same
    /// outcome lists the batch response body does.
    Complete {
        status: ReportStatus,
        message: String,
        successful: Vec<DestinationSuccess>,
        failed: Vec<DestinationFailure>,
    },

    /// The publish aborted before fan-out
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl PublishEvent {
    /// Build the status event for a lifecycle step.
    pub fn step(step: PublishStep) -> Self {
        PublishEvent::Status {
            step,
            message: step.message().to_string(),
            step_index: step.index(),
            total_steps: TOTAL_STEPS,
        }
    }

    /// The SSE event name this event is delivered under.
    pub fn sse_name(&self) -> &'static str {
        match self {
            PublishEvent::Status { .. } => "status",
            PublishEvent::Progress { .. } => "progress",
            PublishEvent::Complete { .. } => "complete",
            PublishEvent::Error { .. } => "error",
        }
    }
}

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<PublishEvent>;

/// Broadcast bus for publish events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PublishEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: PublishEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Progress sink that counts destination completions onto the bus.
///
/// One instance is shared across all publishers of a single publish, so
/// `current` climbs monotonically toward the destination total no matter
/// which platform finishes first. Start notifications carry the count of
/// destinations finished so far; only completions advance it.
pub struct ProgressBroadcast {
    bus: EventBus,
    current: AtomicUsize,
    total: usize,
}

impl ProgressBroadcast {
    pub fn new(bus: EventBus, total: usize) -> Self {
        Self {
            bus,
            current: AtomicUsize::new(0),
            total,
        }
    }
}

impl ProgressSink for ProgressBroadcast {
    fn destination_update(&self, platform: Platform, action: ProgressAction, account_name: &str) {
        let current = match action {
            ProgressAction::Starting => self.current.load(Ordering::SeqCst),
            ProgressAction::Completed | ProgressAction::Failed => {
                self.current.fetch_add(1, Ordering::SeqCst) + 1
            }
        };
        self.bus.emit(PublishEvent::Progress {
            platform,
            action,
            account_name: account_name.to_string(),
            current,
            total: self.total,
        });
    }
}
