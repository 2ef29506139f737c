//! # Event Bus System
//!
//! Broadcast channel for sync lifecycle and per-record outcome events,
//! built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`SyncEvent`] for run lifecycle, [`RecordEvent`] for
//!   what happened to an individual record
//! - **EventBus**: cloneable publisher handle
//! - **EventStream**: receiver with an optional filter
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!     sync_id: 7,
//!     records_processed: 25,
//! }))
//! .ok();
//!
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! `RecvError::Lagged(n)` means the subscriber fell `n` events behind and can
//! keep reading. `RecvError::Closed` means every publisher is gone.
//!
//! Emitting with no subscriber returns an error; publishers in this workspace
//! ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default per-subscriber buffer
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Everything published on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Sync(SyncEvent),
    Record(RecordEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Record(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Record(RecordEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Record(RecordEvent::Conflict { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Started { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Lifecycle of one sync-up run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started {
        sync_id: i64,
        /// Local store location being uploaded
        store: String,
        /// Strategy name (`batch`, `collection`, `parentChildren`)
        target: String,
        total_records: u64,
    },
    /// Emitted after each page
    Progress {
        sync_id: i64,
        records_processed: u64,
        total_records: u64,
        percent: u8,
    },
    Completed {
        sync_id: i64,
        records_processed: u64,
        records_uploaded: u64,
        records_failed: u64,
        records_conflicted: u64,
        duration_ms: u64,
    },
    Failed {
        sync_id: i64,
        message: String,
        records_processed: u64,
    },
    /// Stopped through the cancellation token between pages
    Cancelled {
        sync_id: i64,
        records_processed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync up started",
            SyncEvent::Progress { .. } => "Sync up in progress",
            SyncEvent::Completed { .. } => "Sync up completed",
            SyncEvent::Failed { .. } => "Sync up failed",
            SyncEvent::Cancelled { .. } => "Sync up cancelled",
        }
    }
}

// ============================================================================
// Record Events
// ============================================================================

/// Outcome for a single record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RecordEvent {
    /// Server accepted the change; local flags cleared
    Uploaded {
        store: String,
        record_id: String,
    },
    /// Confirmed or local-only delete; row removed
    Removed {
        store: String,
        record_id: String,
    },
    /// Server rejected the change; row left dirty with its last error
    Failed {
        store: String,
        record_id: String,
        status: i32,
    },
    /// Server copy changed since the local baseline; upload skipped
    Conflict {
        store: String,
        record_id: String,
    },
}

impl RecordEvent {
    fn description(&self) -> &str {
        match self {
            RecordEvent::Uploaded { .. } => "Record uploaded",
            RecordEvent::Removed { .. } => "Record removed",
            RecordEvent::Failed { .. } => "Record upload failed",
            RecordEvent::Conflict { .. } => "Record left unchanged after conflict",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Publisher handle; clones share one channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a subscriber may lag before `Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers reached.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

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

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by a predicate
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let failures = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Record(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }

    /// Next accepted event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already buffered, if any.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
