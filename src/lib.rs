//! Workspace umbrella crate.
//!
//! Re-exports the sync service so host applications can depend on one crate
//! and pick the bridge set through features.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
