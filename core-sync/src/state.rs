//! # Sync State Machine
//!
//! A persisted sync-up definition and the lifecycle of its runs.
//!
//! ## State Machine
//!
//! ```text
//! New → Running → Done
//!          ↓  ↑      │
//!          ↓  └──────┤  (re-run)
//!          ├→ Failed ┤
//!          └→ Stopped┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{MergeMode, SyncOptions, SyncState, SyncUpTarget};
//!
//! let state = SyncState::new(1, target, SyncOptions::new(fieldlist, MergeMode::Overwrite), "accounts");
//! let mut state = state.start(now)?;
//! state.update_progress(10, 40)?;
//! let state = state.complete(later)?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::conflict::MergeMode;
use crate::error::{Result, SyncError};
use crate::target::SyncUpTarget;

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Defined, never run
    New,
    Running,
    Done,
    Failed,
    /// Cancelled between pages
    Stopped,
}

impl SyncStatus {
    /// Check if this status ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Done | SyncStatus::Failed | SyncStatus::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::New => "NEW",
            SyncStatus::Running => "RUNNING",
            SyncStatus::Done => "DONE",
            SyncStatus::Failed => "FAILED",
            SyncStatus::Stopped => "STOPPED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NEW" => Ok(SyncStatus::New),
            "RUNNING" => Ok(SyncStatus::Running),
            "DONE" => Ok(SyncStatus::Done),
            "FAILED" => Ok(SyncStatus::Failed),
            "STOPPED" => Ok(SyncStatus::Stopped),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Options
// ============================================================================

/// Fields to upload and the merge mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    pub fieldlist: Vec<String>,
    #[serde(default)]
    pub merge_mode: MergeMode,
}

impl SyncOptions {
    pub fn new(fieldlist: Vec<String>, merge_mode: MergeMode) -> Self {
        Self {
            fieldlist,
            merge_mode,
        }
    }
}

// ============================================================================
// Sync State Entity
// ============================================================================

/// A sync-up definition plus the status of its latest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target: SyncUpTarget,
    pub options: SyncOptions,
    /// Local store location holding the records
    pub soup_name: String,
    pub status: SyncStatus,
    /// Percent, 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    /// Unix millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl SyncState {
    /// Create a sync-up definition in `New` state
    pub fn new(
        id: i64,
        target: impl Into<SyncUpTarget>,
        options: SyncOptions,
        soup_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: None,
            target: target.into(),
            options,
            soup_name: soup_name.into(),
            status: SyncStatus::New,
            progress: 0,
            total_size: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Start a run
    ///
    /// # Errors
    ///
    /// Returns an error if a run is already in progress
    pub fn start(mut self, now_millis: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.progress = 0;
        self.total_size = None;
        self.error = None;
        self.start_time = Some(now_millis);
        self.end_time = None;
        Ok(self)
    }

    /// Update progress information
    ///
    /// # Errors
    ///
    /// Returns an error if the state is not `Running`
    pub fn update_progress(&mut self, processed: u64, total: u64) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Sync must be running to update progress".to_string(),
            });
        }

        self.total_size = Some(total);
        self.progress = percent(processed, total);
        Ok(())
    }

    pub fn complete(mut self, now_millis: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Done)?;
        self.status = SyncStatus::Done;
        self.progress = 100;
        self.end_time = Some(now_millis);
        Ok(self)
    }

    pub fn fail(mut self, error: impl Into<String>, now_millis: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(now_millis);
        Ok(self)
    }

    pub fn stop(mut self, now_millis: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Stopped)?;
        self.status = SyncStatus::Stopped;
        self.end_time = Some(now_millis);
        Ok(self)
    }

    /// Run duration in milliseconds, once the run has ended
    pub fn duration_millis(&self) -> Option<u64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start).max(0) as u64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SyncStatus::New, SyncStatus::Running) => true,

            (SyncStatus::Running, SyncStatus::Done) => true,
            (SyncStatus::Running, SyncStatus::Failed) => true,
            (SyncStatus::Running, SyncStatus::Stopped) => true,

            // Finished runs may be started again
            (from, SyncStatus::Running) if from.is_terminal() => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) * 100) / total) as u8
}
