//! # Event Bus System
//!
//! In-process broadcast of sync lifecycle events using
//! `tokio::sync::broadcast`. Observers (status endpoints, metrics exporters,
//! tests) subscribe without coupling to the orchestrator.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SyncEvent::CycleSkipped {
//!     reason: "cycle already running".to_string(),
//! })
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Sync cycle skipped");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. Non-fatal.
//! - **`RecvError::Closed`**: the bus was dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns `Err`; publishers ignore it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Events emitted over the life of a sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A cycle acquired the running flag.
    CycleStarted {
        cycle_id: Uuid,
        /// Watermark timestamp the cycle starts from.
        since: DateTime<Utc>,
        since_id: i64,
    },
    /// A record was accepted by the destination and the watermark advanced.
    RecordDelivered {
        cycle_id: Uuid,
        record_id: i64,
        status: u16,
        attempts: u32,
    },
    /// A record failed validation and was skipped.
    RecordRejected {
        cycle_id: Uuid,
        record_id: i64,
        errors: Vec<String>,
    },
    /// A record exhausted its delivery attempts and was skipped.
    RecordFailed {
        cycle_id: Uuid,
        record_id: i64,
        attempts: u32,
        message: String,
    },
    /// The cycle finished, possibly with per-record failures.
    CycleCompleted {
        cycle_id: Uuid,
        fetched: usize,
        delivered: usize,
        invalid: usize,
        failed: usize,
        duration_ms: u64,
        cancelled: bool,
    },
    /// The cycle aborted before finishing (storage or fetch failure).
    CycleFailed { cycle_id: Uuid, message: String },
    /// A cycle was requested while another one was running.
    CycleSkipped { reason: String },
}

impl SyncEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            SyncEvent::CycleStarted { .. } => "Sync cycle started",
            SyncEvent::RecordDelivered { .. } => "Order delivered",
            SyncEvent::RecordRejected { .. } => "Order rejected by validation",
            SyncEvent::RecordFailed { .. } => "Order delivery failed",
            SyncEvent::CycleCompleted { .. } => "Sync cycle completed",
            SyncEvent::CycleFailed { .. } => "Sync cycle failed",
            SyncEvent::CycleSkipped { .. } => "Sync cycle skipped",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncEvent::RecordFailed { .. } | SyncEvent::CycleFailed { .. }
        )
    }
}

/// Central broadcast channel for [`SyncEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
