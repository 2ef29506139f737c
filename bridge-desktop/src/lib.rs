//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with retry and backoff
//! - `LocalStore` as an in-memory soup store with snapshot transactions
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{MemoryRecordStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new());
//! let store = Arc::new(MemoryRecordStore::new());
//! // Hand both to EngineConfig::builder()
//! ```

mod http;
mod store;

pub use http::ReqwestHttpClient;
pub use store::MemoryRecordStore;
