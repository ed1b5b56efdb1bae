//! Index marker protocol
//!
//! The commit-log writer maintains a sidecar marker per segment telling
//! readers how far the segment is durably parseable: line 1 is the decimal
//! safe offset in bytes, and an optional second line holding the literal
//! `COMPLETED` token means no more bytes will ever be appended.
//!
//! Markers are rewritten while we read them, so every failure mode here is
//! treated as a race, not an error: an absent file, a half-written offset
//! line, or a torn `COMPLETED` token all fall back to the previous known
//! snapshot. Safe offsets are clamped monotonic per segment, and a completed
//! flag, once seen, sticks.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::commitlog::segment::SegmentId;
use crate::common::{CdcError, Result};

/// Token on the marker's second line that finalizes a segment.
pub const COMPLETED_TOKEN: &str = "COMPLETED";

/// Snapshot of a segment's marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMarker {
    /// Bytes known durable; never read past this
    pub safe_offset: u64,
    /// No more bytes will ever be appended
    pub completed: bool,
}

impl IndexMarker {
    pub fn new(safe_offset: u64, completed: bool) -> Self {
        Self {
            safe_offset,
            completed,
        }
    }
}

/// Reads marker files, keeping the last known snapshot per segment.
#[derive(Debug, Default)]
pub struct IndexMarkerReader {
    last_seen: HashMap<SegmentId, IndexMarker>,
}

impl IndexMarkerReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the marker at `marker_path`. Returns the freshest consistent
    /// snapshot for the segment, or `None` if no marker has ever been
    /// readable. Read and parse failures reuse the previous value.
    pub async fn read(&mut self, segment: SegmentId, marker_path: &Path) -> Option<IndexMarker> {
        match read_marker_file(segment, marker_path).await {
            Ok(fresh) => {
                let merged = match self.last_seen.get(&segment) {
                    Some(prev) => {
                        if fresh.safe_offset < prev.safe_offset {
                            debug!(
                                segment = %segment,
                                fresh = fresh.safe_offset,
                                previous = prev.safe_offset,
                                "marker re-read went backwards, clamping"
                            );
                        }
                        IndexMarker {
                            safe_offset: fresh.safe_offset.max(prev.safe_offset),
                            completed: fresh.completed || prev.completed,
                        }
                    }
                    None => fresh,
                };
                self.last_seen.insert(segment, merged);
                Some(merged)
            }
            Err(e) => {
                let previous = self.last_seen.get(&segment).copied();
                warn!(
                    segment = %segment,
                    error = %e,
                    has_previous = previous.is_some(),
                    "index marker unreadable, reusing previous value"
                );
                previous
            }
        }
    }

    /// Last snapshot returned for a segment, without touching the file.
    pub fn last_known(&self, segment: &SegmentId) -> Option<IndexMarker> {
        self.last_seen.get(segment).copied()
    }

    /// Drop per-segment state once the segment leaves the pipeline.
    pub fn forget(&mut self, segment: &SegmentId) {
        self.last_seen.remove(segment);
    }
}

async fn read_marker_file(segment: SegmentId, path: &Path) -> Result<IndexMarker> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CdcError::marker_unreadable(segment.to_string(), e.to_string()))?;
    parse_marker(segment, &text)
}

fn parse_marker(segment: SegmentId, text: &str) -> Result<IndexMarker> {
    let mut lines = text.lines();

    let offset_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| CdcError::marker_unreadable(segment.to_string(), "empty marker file"))?;

    let safe_offset: u64 = offset_line.parse().map_err(|_| {
        CdcError::marker_unreadable(
            segment.to_string(),
            format!("non-numeric offset line {offset_line:?}"),
        )
    })?;

    // A torn second line is a racing write of the COMPLETED token; report
    // the offset as not-yet-completed and pick the token up next poll.
    let completed = lines
        .next()
        .map(|l| l.trim() == COMPLETED_TOKEN)
        .unwrap_or(false);

    Ok(IndexMarker::new(safe_offset, completed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> SegmentId {
        SegmentId::new(1, 1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_missing_marker_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = IndexMarkerReader::new();
        let path = dir.path().join(seg().marker_file_name());

        assert_eq!(reader.read(seg(), &path).await, None);
        assert_eq!(reader.last_known(&seg()), None);
    }

    #[tokio::test]
    async fn test_offset_only_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        std::fs::write(&path, "4096\n").unwrap();

        let mut reader = IndexMarkerReader::new();
        let marker = reader.read(seg(), &path).await.unwrap();
        assert_eq!(marker, IndexMarker::new(4096, false));
    }

    #[tokio::test]
    async fn test_completed_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        std::fs::write(&path, "19999\nCOMPLETED").unwrap();

        let mut reader = IndexMarkerReader::new();
        let marker = reader.read(seg(), &path).await.unwrap();
        assert_eq!(marker, IndexMarker::new(19999, true));
    }

    #[tokio::test]
    async fn test_torn_completed_token_reports_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        std::fs::write(&path, "19999\nCOMPL").unwrap();

        let mut reader = IndexMarkerReader::new();
        let marker = reader.read(seg(), &path).await.unwrap();
        assert_eq!(marker, IndexMarker::new(19999, false));
    }

    #[tokio::test]
    async fn test_monotonic_clamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        let mut reader = IndexMarkerReader::new();

        std::fs::write(&path, "100\n").unwrap();
        assert_eq!(reader.read(seg(), &path).await.unwrap().safe_offset, 100);

        // A stale smaller read must never surface.
        std::fs::write(&path, "50\n").unwrap();
        assert_eq!(reader.read(seg(), &path).await.unwrap().safe_offset, 100);

        std::fs::write(&path, "150\n").unwrap();
        assert_eq!(reader.read(seg(), &path).await.unwrap().safe_offset, 150);
    }

    #[tokio::test]
    async fn test_unreadable_reuses_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        let mut reader = IndexMarkerReader::new();

        std::fs::write(&path, "100\n").unwrap();
        assert!(reader.read(seg(), &path).await.is_some());

        std::fs::remove_file(&path).unwrap();
        let marker = reader.read(seg(), &path).await.unwrap();
        assert_eq!(marker.safe_offset, 100);

        std::fs::write(&path, "not-a-number\n").unwrap();
        let marker = reader.read(seg(), &path).await.unwrap();
        assert_eq!(marker.safe_offset, 100);
    }

    #[tokio::test]
    async fn test_completed_sticks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        let mut reader = IndexMarkerReader::new();

        std::fs::write(&path, "100\nCOMPLETED").unwrap();
        assert!(reader.read(seg(), &path).await.unwrap().completed);

        std::fs::write(&path, "100\n").unwrap();
        assert!(reader.read(seg(), &path).await.unwrap().completed);
    }

    #[tokio::test]
    async fn test_forget_drops_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().marker_file_name());
        let mut reader = IndexMarkerReader::new();

        std::fs::write(&path, "100\n").unwrap();
        reader.read(seg(), &path).await.unwrap();
        reader.forget(&seg());

        std::fs::remove_file(&path).unwrap();
        assert_eq!(reader.read(seg(), &path).await, None);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let marker = parse_marker(seg(), " 42 \r\nCOMPLETED\r\n").unwrap();
        assert_eq!(marker, IndexMarker::new(42, true));

        assert!(parse_marker(seg(), "").is_err());
        assert!(parse_marker(seg(), "\n").is_err());
    }
}
