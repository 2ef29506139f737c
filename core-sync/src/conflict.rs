//! Conflict classification
//!
//! Decides whether a local change may overwrite the server copy when the
//! merge mode is [`MergeMode::LeaveIfChanged`].

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What to do when the server copy changed since the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    /// Local changes always win
    #[default]
    Overwrite,
    /// Skip records whose server copy is newer
    LeaveIfChanged,
}

/// Last-modified timestamp and deletion state of one copy of a record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordModDate {
    pub timestamp: Option<String>,
    pub is_deleted: bool,
}

impl RecordModDate {
    pub fn new(timestamp: Option<String>, is_deleted: bool) -> Self {
        Self {
            timestamp,
            is_deleted,
        }
    }

    /// Server copy that no longer exists.
    pub fn deleted() -> Self {
        Self::new(None, true)
    }
}

/// `true` when the local copy may be pushed.
///
/// Holds when the local copy carries no timestamp, when both copies are
/// deleted, or when both timestamps exist and the local one is not older.
pub fn is_newer_than_server(local: &RecordModDate, remote: &RecordModDate) -> bool {
    if local.timestamp.is_none() {
        return true;
    }
    if local.is_deleted && remote.is_deleted {
        return true;
    }
    match (&local.timestamp, &remote.timestamp) {
        (Some(local_ts), Some(remote_ts)) => {
            compare_timestamps(local_ts, remote_ts) != Ordering::Less
        }
        _ => false,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
}

/// Compare as instants; fall back to string order when either side does
/// not parse.
fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> RecordModDate {
        RecordModDate::new(Some(ts.to_string()), false)
    }

    #[test]
    fn test_decision_table() {
        let older = "2024-01-01T00:00:00.000+0000";
        let newer = "2024-06-01T00:00:00.000+0000";

        assert!(is_newer_than_server(&RecordModDate::default(), &at(newer)));
        assert!(is_newer_than_server(&at(newer), &at(older)));
        assert!(is_newer_than_server(&at(older), &at(older)));
        assert!(!is_newer_than_server(&at(older), &at(newer)));

        let local_deleted = RecordModDate::new(Some(older.to_string()), true);
        assert!(is_newer_than_server(&local_deleted, &RecordModDate::deleted()));

        // Remote gone while local still edits it
        assert!(!is_newer_than_server(&at(newer), &RecordModDate::deleted()));
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        let local = at("2024-01-01T10:00:00.000+0200");
        let remote = at("2024-01-01T09:00:00Z");
        assert!(!is_newer_than_server(&local, &remote));

        let local = at("2024-01-01T12:00:00.000+0200");
        assert!(is_newer_than_server(&local, &remote));
    }

    #[test]
    fn test_merge_mode_serde() {
        assert_eq!(
            serde_json::to_string(&MergeMode::LeaveIfChanged).unwrap(),
            "\"LEAVE_IF_CHANGED\""
        );
        let parsed: MergeMode = serde_json::from_str("\"OVERWRITE\"").unwrap();
        assert_eq!(parsed, MergeMode::Overwrite);
    }
}
