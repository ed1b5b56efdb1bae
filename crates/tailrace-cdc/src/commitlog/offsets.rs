//! Durable per-segment read positions
//!
//! The offset store remembers, per segment log file, the cursor up to which
//! events were handed to the queues, plus a completed latch set once the
//! segment was fully processed. Restart resumes each segment from its stored
//! cursor, so delivery is at-least-once: a crash between handoff and flush
//! replays the tail of the segment, never skips it.
//!
//! Persistence is one JSON snapshot, written atomically (temp file, fsync,
//! rename). Flushing is batched: every record when the flush interval is
//! zero, otherwise when enough updates buffered or the interval elapsed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::commitlog::segment::{Cursor, SegmentId};
use crate::common::{CdcError, Result};

const OFFSETS_FILE: &str = "offsets.json";
const OFFSETS_TMP_FILE: &str = "offsets.json.tmp";

/// Stored position of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEntry {
    /// Byte offset up to which mutations were handed off
    pub offset: u64,
    /// Next mutation sequence within the segment
    pub sequence: u64,
    /// Set once the segment was processed to its completed marker
    pub completed: bool,
}

impl OffsetEntry {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.offset, self.sequence)
    }
}

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct OffsetSnapshot {
    flushed_at: DateTime<Utc>,
    offsets: HashMap<String, OffsetEntry>,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, OffsetEntry>,
    dirty: usize,
    last_flush: Instant,
}

/// Buffered, atomically-flushed offset store keyed by segment log file name.
#[derive(Debug)]
pub struct OffsetStore {
    path: PathBuf,
    tmp_path: PathBuf,
    flush_interval: Duration,
    max_buffered: usize,
    inner: Mutex<Inner>,
}

impl OffsetStore {
    /// Open the store under `dir`, loading any previous snapshot. A snapshot
    /// that fails to parse is logged and ignored; replaying already-delivered
    /// segments is safe under at-least-once delivery, skipping them is not.
    pub fn open(dir: &Path, flush_interval: Duration, max_buffered: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(OFFSETS_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<OffsetSnapshot>(&raw) {
                Ok(snapshot) => {
                    debug!(
                        path = %path.display(),
                        segments = snapshot.offsets.len(),
                        flushed_at = %snapshot.flushed_at,
                        "loaded offset snapshot"
                    );
                    snapshot.offsets
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "offset snapshot unreadable, starting from segment beginnings"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            tmp_path: dir.join(OFFSETS_TMP_FILE),
            path,
            flush_interval,
            max_buffered: max_buffered.max(1),
            inner: Mutex::new(Inner {
                entries,
                dirty: 0,
                last_flush: Instant::now(),
            }),
        })
    }

    /// Stored cursor for a segment, if any.
    pub fn position_of(&self, segment: &SegmentId) -> Option<Cursor> {
        self.inner
            .lock()
            .entries
            .get(&segment.log_file_name())
            .map(|e| e.cursor())
    }

    /// Whether a segment was already processed to completion.
    pub fn is_completed(&self, segment: &SegmentId) -> bool {
        self.inner
            .lock()
            .entries
            .get(&segment.log_file_name())
            .is_some_and(|e| e.completed)
    }

    /// Record the cursor after one handed-off mutation. Flushes per policy.
    pub fn record(&self, segment: &SegmentId, cursor: Cursor) -> Result<()> {
        self.update(segment, cursor, false, false)
    }

    /// Latch a segment completed at its final cursor. Always flushes: the
    /// segment is about to be sealed and transferred, and the latch is what
    /// keeps a restart from re-admitting it.
    pub fn record_completed(&self, segment: &SegmentId, cursor: Cursor) -> Result<()> {
        self.update(segment, cursor, true, true)
    }

    fn update(
        &self,
        segment: &SegmentId,
        cursor: Cursor,
        completed: bool,
        force_flush: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .entry(segment.log_file_name())
            .or_insert(OffsetEntry {
                offset: 0,
                sequence: 0,
                completed: false,
            });
        entry.offset = cursor.offset;
        entry.sequence = cursor.sequence;
        entry.completed |= completed;
        inner.dirty += 1;

        let due = force_flush
            || self.flush_interval.is_zero()
            || inner.dirty >= self.max_buffered
            || inner.last_flush.elapsed() >= self.flush_interval;
        if due {
            self.flush_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Flush buffered updates to disk. No-op when nothing is dirty.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dirty == 0 {
            return Ok(());
        }
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        let snapshot = OffsetSnapshot {
            flushed_at: Utc::now(),
            offsets: inner.entries.clone(),
        };
        let raw = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| CdcError::offset_persist(format!("serialize offsets: {e}")))?;

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&self.tmp_path)?;
            file.write_all(&raw)?;
            file.sync_all()?;
            fs::rename(&self.tmp_path, &self.path)?;
            Ok(())
        };
        write().map_err(|e| {
            CdcError::offset_persist(format!("write {}: {e}", self.path.display()))
        })?;

        inner.dirty = 0;
        inner.last_flush = Instant::now();
        debug!(path = %self.path.display(), segments = inner.entries.len(), "flushed offsets");
        Ok(())
    }

    /// Number of tracked segments.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
