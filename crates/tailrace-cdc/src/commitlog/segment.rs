//! Segment identity and lifecycle states
//!
//! A segment is one file-unit of the append-only commit log, named
//! `commitlog-<index>-<generation>.log`. The index is a monotonically
//! increasing number assigned by the writer; the generation timestamp breaks
//! ties across writer restarts. The sidecar index marker replaces the `.log`
//! suffix with `_cdc.idx`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{CdcError, Result};

/// Segment log file suffix.
pub const LOG_SUFFIX: &str = ".log";
/// Sidecar index marker suffix, replacing [`LOG_SUFFIX`].
pub const MARKER_SUFFIX: &str = "_cdc.idx";

const NAME_PREFIX: &str = "commitlog-";

/// Identity of one commit-log segment. Ordering follows write order: index
/// first, generation timestamp breaking ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId {
    /// Monotonically increasing segment number
    pub index: u64,
    /// Writer generation timestamp (epoch millis)
    pub generation: i64,
}

impl SegmentId {
    pub fn new(index: u64, generation: i64) -> Self {
        Self { index, generation }
    }

    /// Parse a segment id from a log file name. Marker files and anything
    /// else not matching the naming convention are rejected.
    pub fn parse(file_name: &str) -> Result<Self> {
        let invalid = || CdcError::InvalidSegmentName(file_name.to_string());

        let stem = file_name
            .strip_prefix(NAME_PREFIX)
            .and_then(|rest| rest.strip_suffix(LOG_SUFFIX))
            .ok_or_else(invalid)?;

        let (index, generation) = stem.split_once('-').ok_or_else(invalid)?;
        let index: u64 = index.parse().map_err(|_| invalid())?;
        let generation: i64 = generation.parse().map_err(|_| invalid())?;
        Ok(Self { index, generation })
    }

    /// Log file name for this segment.
    pub fn log_file_name(&self) -> String {
        format!("{self}{LOG_SUFFIX}")
    }

    /// Sidecar marker file name for this segment.
    pub fn marker_file_name(&self) -> String {
        format!("{self}{MARKER_SUFFIX}")
    }

    /// Marker path next to a segment's log path.
    pub fn marker_path(&self, log_path: &Path) -> PathBuf {
        match log_path.parent() {
            Some(dir) => dir.join(self.marker_file_name()),
            None => PathBuf::from(self.marker_file_name()),
        }
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{NAME_PREFIX}{}-{}", self.index, self.generation)
    }
}

/// Read position within a segment: byte offset plus mutation sequence
/// counter. Both advance together as mutations are consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Absolute byte offset into the segment file
    pub offset: u64,
    /// Zero-based count of mutations consumed so far
    pub sequence: u64,
}

impl Cursor {
    pub fn new(offset: u64, sequence: u64) -> Self {
        Self { offset, sequence }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset {} seq {}", self.offset, self.sequence)
    }
}

/// Lifecycle state of a segment under management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Seen in the watch directory, not yet admitted for reading
    Discovered,
    /// Cursor advancing through confirmed-safe bytes
    Reading,
    /// Caught up to the safe offset, waiting for the completion marker
    /// (real-time mode only)
    AwaitingCompletion,
    /// All bytes consumed and marker reports completed
    Sealed,
    /// Transfer hook succeeded; segment has left the pipeline
    Transferred,
    /// Corrupt data, schema exhaustion, or transfer failure
    Errored,
}

impl SegmentState {
    /// Whether the state machine allows moving to `next` from here.
    pub fn can_transition_to(&self, next: SegmentState) -> bool {
        use SegmentState::*;
        matches!(
            (self, next),
            (Discovered, Reading)
                | (Reading, AwaitingCompletion)
                | (AwaitingCompletion, Reading)
                | (Reading, Sealed)
                | (AwaitingCompletion, Sealed)
                | (Sealed, Transferred)
                | (Reading, Errored)
                | (Sealed, Errored)
                | (Errored, Reading)
        )
    }

    /// Terminal success state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentState::Transferred)
    }
}

impl std::fmt::Display for SegmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SegmentState::Discovered => "DISCOVERED",
            SegmentState::Reading => "READING",
            SegmentState::AwaitingCompletion => "AWAITING_COMPLETION",
            SegmentState::Sealed => "SEALED",
            SegmentState::Transferred => "TRANSFERRED",
            SegmentState::Errored => "ERRORED",
        };
        write!(f, "{s}")
    }
}

/// A segment file found in the watch directory.
#[derive(Debug, Clone)]
pub struct DiscoveredSegment {
    pub id: SegmentId,
    pub path: PathBuf,
}

/// Enumerate segment files in the watch directory, sorted by identity
/// ascending to preserve write order. Files not matching the naming
/// convention (markers included) are skipped.
pub async fn scan_commit_logs(dir: &Path) -> Result<Vec<DiscoveredSegment>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(id) = SegmentId::parse(name) else {
            continue;
        };
        found.push(DiscoveredSegment {
            id,
            path: entry.path(),
        });
    }

    found.sort_by_key(|seg| seg.id);
    debug!(dir = %dir.display(), count = found.len(), "scanned commit log directory");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let id = SegmentId::new(42, 1_700_000_000_000);
        assert_eq!(id.log_file_name(), "commitlog-42-1700000000000.log");
        assert_eq!(id.marker_file_name(), "commitlog-42-1700000000000_cdc.idx");

        let parsed = SegmentId::parse(&id.log_file_name()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_non_segments() {
        assert!(SegmentId::parse("commitlog-42-1700000000000_cdc.idx").is_err());
        assert!(SegmentId::parse("notes.txt").is_err());
        assert!(SegmentId::parse("commitlog-x-1.log").is_err());
        assert!(SegmentId::parse("commitlog-42.log").is_err());
        assert!(SegmentId::parse("commitlog-42-17.log.tmp").is_err());
    }

    #[test]
    fn test_ordering_index_then_generation() {
        let a = SegmentId::new(1, 200);
        let b = SegmentId::new(2, 100);
        let c = SegmentId::new(2, 150);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_marker_path_sits_next_to_log() {
        let id = SegmentId::new(7, 5);
        let marker = id.marker_path(Path::new("/data/cdc_raw/commitlog-7-5.log"));
        assert_eq!(
            marker,
            PathBuf::from("/data/cdc_raw/commitlog-7-5_cdc.idx")
        );
    }

    #[test]
    fn test_state_transitions() {
        use SegmentState::*;
        assert!(Discovered.can_transition_to(Reading));
        assert!(Reading.can_transition_to(AwaitingCompletion));
        assert!(AwaitingCompletion.can_transition_to(Reading));
        assert!(Reading.can_transition_to(Sealed));
        assert!(AwaitingCompletion.can_transition_to(Sealed));
        assert!(Sealed.can_transition_to(Transferred));
        assert!(Reading.can_transition_to(Errored));
        assert!(Sealed.can_transition_to(Errored));
        assert!(Errored.can_transition_to(Reading));

        assert!(!Discovered.can_transition_to(Sealed));
        assert!(!Transferred.can_transition_to(Reading));
        assert!(!Sealed.can_transition_to(Reading));
        assert!(Transferred.is_terminal());
        assert!(!Sealed.is_terminal());
    }

    #[tokio::test]
    async fn test_scan_sorts_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let touch = |name: &str| std::fs::write(dir.path().join(name), b"x").unwrap();

        touch("commitlog-2-100.log");
        touch("commitlog-1-100.log");
        touch("commitlog-1-100_cdc.idx");
        touch("notes.txt");

        let found = scan_commit_logs(dir.path()).await.unwrap();
        let ids: Vec<u64> = found.iter().map(|s| s.id.index).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(found[0].path.ends_with("commitlog-1-100.log"));
    }
}
