//! # Host Bridge Traits
//!
//! Contracts between the sync engine and the host it runs in.
//!
//! ## Overview
//!
//! The engine needs two collaborators it does not implement itself: an HTTP
//! transport that reaches the REST data service, and a local record store that
//! holds the offline copy of the data. Each is a trait here; hosts ship the
//! concrete adapters (`bridge-desktop` provides defaults).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with retry and auth handled by the host
//! - [`LocalStore`](store::LocalStore) - Record store with dirty-row queries and transactions
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Fail-Fast Strategy
//!
//! The engine refuses to start when a required capability is missing:
//!
//! ```ignore
//! let store = config.local_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "LocalStore".to_string(),
//!         message: "Inject a LocalStore implementation.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert their native errors and keep the message actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`.

pub mod error;
pub mod http;
pub mod store;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use store::{DirtyParentQuery, LocalStore, Record, TransactionId};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
