//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the sync engine crates:
//! - Logging and tracing setup
//! - Engine configuration with fail-fast validation
//! - Event bus for sync progress and per-record outcomes
//!
//! ## Overview
//!
//! Nothing in here knows about records or REST calls. The crate fixes the
//! conventions (how to log, how to configure, how to publish progress) the
//! other crates follow.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
