//! Segment lifecycle tracking
//!
//! Every segment moves through a fixed state machine:
//!
//! ```text
//! DISCOVERED -> READING <-> AWAITING_COMPLETION
//!                  |   \________
//!                  v            v
//!               ERRORED <--- SEALED -> TRANSFERRED
//! ```
//!
//! The manager owns the per-segment state table, admission policy (completed
//! segments are skipped, errored segments re-admitted only when reprocessing
//! is enabled, optionally only the latest pre-existing segment), transition
//! enforcement, and the post-processing transfer of sealed segments. A failed
//! transfer keeps the segment sealed with its file intact; it is retried on a
//! later discovery pass. A successful transfer that removes the file also
//! drops the segment from tracking, so the state table holds entries only
//! for files still on disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::commitlog::offsets::OffsetStore;
use crate::commitlog::segment::{DiscoveredSegment, SegmentId, SegmentState};
use crate::commitlog::transfer::CommitLogTransfer;
use crate::common::{CdcError, CommitLogConfig, Result};

/// Snapshot of one tracked segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSegment {
    pub id: SegmentId,
    pub path: PathBuf,
    pub state: SegmentState,
}

#[derive(Debug)]
struct Tracked {
    path: PathBuf,
    state: SegmentState,
}

#[derive(Debug, Default)]
struct Inner {
    segments: BTreeMap<SegmentId, Tracked>,
    /// Never admitted: completed before this run, or older than the latest
    /// segment in latest-only mode. Grows one id per distinct skipped file
    /// over the life of the process.
    ignored: HashSet<SegmentId>,
    /// Errored segments re-queued by the last discovery pass.
    errored_retry: BTreeSet<SegmentId>,
    first_scan_done: bool,
}

/// Tracks segment states and drives post-processing.
pub struct SegmentLifecycleManager {
    post_processing_enabled: bool,
    error_reprocessing_enabled: bool,
    latest_segment_only: bool,
    transfer: Arc<dyn CommitLogTransfer>,
    inner: Mutex<Inner>,
}

impl SegmentLifecycleManager {
    pub fn new(config: &CommitLogConfig, transfer: Arc<dyn CommitLogTransfer>) -> Self {
        Self {
            post_processing_enabled: config.post_processing_enabled,
            error_reprocessing_enabled: config.error_reprocessing_enabled,
            latest_segment_only: config.latest_segment_only,
            transfer,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Admit newly discovered segments. Returns how many entered DISCOVERED.
    ///
    /// A candidate whose completed latch is set in the offset store was
    /// already delivered; if its file is still on disk with post-processing
    /// enabled, the transfer did not finish, so it re-enters as SEALED for a
    /// transfer retry instead of being re-read.
    pub fn admit(&self, candidates: &[DiscoveredSegment], offsets: &OffsetStore) -> usize {
        let mut inner = self.inner.lock();

        if self.error_reprocessing_enabled {
            for candidate in candidates {
                let errored = inner
                    .segments
                    .get(&candidate.id)
                    .is_some_and(|t| t.state == SegmentState::Errored);
                if errored {
                    inner.errored_retry.insert(candidate.id);
                }
            }
        }

        let mut to_admit: Vec<(SegmentId, PathBuf)> = Vec::new();
        for candidate in candidates {
            if inner.segments.contains_key(&candidate.id) || inner.ignored.contains(&candidate.id)
            {
                continue;
            }
            if offsets.is_completed(&candidate.id) {
                if self.post_processing_enabled {
                    info!(segment = %candidate.id, "re-queued completed segment for transfer");
                    inner.segments.insert(
                        candidate.id,
                        Tracked {
                            path: candidate.path.clone(),
                            state: SegmentState::Sealed,
                        },
                    );
                } else {
                    debug!(segment = %candidate.id, "skipping completed segment");
                    inner.ignored.insert(candidate.id);
                }
                continue;
            }
            to_admit.push((candidate.id, candidate.path.clone()));
        }

        if self.latest_segment_only && !inner.first_scan_done {
            if let Some(latest) = to_admit.iter().map(|(id, _)| *id).max() {
                for (id, _) in to_admit.iter().filter(|(id, _)| *id != latest) {
                    info!(segment = %id, "skipping pre-existing segment, tailing latest only");
                    inner.ignored.insert(*id);
                }
                to_admit.retain(|(id, _)| *id == latest);
            }
        }
        inner.first_scan_done = true;

        let admitted = to_admit.len();
        for (id, path) in to_admit {
            info!(segment = %id, path = %path.display(), "discovered segment");
            inner.segments.insert(
                id,
                Tracked {
                    path,
                    state: SegmentState::Discovered,
                },
            );
        }
        admitted
    }

    /// Lowest-ordered segment ready for reading: DISCOVERED, or ERRORED when
    /// the last discovery pass re-queued it.
    pub fn next_ready(&self) -> Option<TrackedSegment> {
        let inner = self.inner.lock();
        for (id, tracked) in &inner.segments {
            let ready = match tracked.state {
                SegmentState::Discovered => true,
                SegmentState::Errored => inner.errored_retry.contains(id),
                _ => false,
            };
            if ready {
                return Some(TrackedSegment {
                    id: *id,
                    path: tracked.path.clone(),
                    state: tracked.state,
                });
            }
        }
        None
    }

    /// Sealed segments still awaiting a (re)tried transfer, in order.
    pub fn sealed_pending_transfer(&self) -> Vec<TrackedSegment> {
        if !self.post_processing_enabled {
            return Vec::new();
        }
        let inner = self.inner.lock();
        inner
            .segments
            .iter()
            .filter(|(_, t)| t.state == SegmentState::Sealed)
            .map(|(id, t)| TrackedSegment {
                id: *id,
                path: t.path.clone(),
                state: t.state,
            })
            .collect()
    }

    pub fn begin_reading(&self, id: SegmentId) -> Result<()> {
        self.inner.lock().errored_retry.remove(&id);
        self.transition(id, SegmentState::Reading)
    }

    pub fn await_completion(&self, id: SegmentId) -> Result<()> {
        self.transition(id, SegmentState::AwaitingCompletion)
    }

    pub fn resume_reading(&self, id: SegmentId) -> Result<()> {
        self.transition(id, SegmentState::Reading)
    }

    pub fn seal(&self, id: SegmentId) -> Result<()> {
        self.transition(id, SegmentState::Sealed)
    }

    /// Park a segment in ERRORED after a non-recoverable failure.
    pub fn mark_errored(&self, id: SegmentId, cause: &CdcError) -> Result<()> {
        error!(segment = %id, error = %cause, code = cause.error_code(), "segment failed");
        self.transition(id, SegmentState::Errored)
    }

    /// Run the configured transfer for a sealed segment. With post-processing
    /// disabled the segment simply retires sealed.
    pub async fn post_process(&self, id: SegmentId) -> Result<()> {
        let path = {
            let inner = self.inner.lock();
            let tracked = inner
                .segments
                .get(&id)
                .ok_or_else(|| CdcError::invalid_state(format!("segment {id} is not tracked")))?;
            if tracked.state != SegmentState::Sealed {
                return Err(CdcError::invalid_state(format!(
                    "segment {id} is {}, only sealed segments post-process",
                    tracked.state
                )));
            }
            tracked.path.clone()
        };

        if !self.post_processing_enabled {
            debug!(segment = %id, "post-processing disabled, segment retired sealed");
            return Ok(());
        }

        match self.transfer.transfer(&id, &path).await {
            Ok(()) => {
                self.transition(id, SegmentState::Transferred)?;
                // A transferred segment whose file left the watch directory
                // cannot be rediscovered; drop it so the table stays bounded
                // by the files on disk. A transfer that keeps the file in
                // place keeps its entry, which is what blocks re-admission.
                if !tokio::fs::try_exists(&path).await.unwrap_or(true) {
                    self.inner.lock().segments.remove(&id);
                    debug!(segment = %id, "transferred segment dropped from tracking");
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    segment = %id,
                    transfer = self.transfer.name(),
                    error = %e,
                    "transfer failed, segment stays sealed"
                );
                Err(e)
            }
        }
    }

    pub fn state_of(&self, id: SegmentId) -> Option<SegmentState> {
        self.inner.lock().segments.get(&id).map(|t| t.state)
    }

    pub fn tracked_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    fn transition(&self, id: SegmentId, next: SegmentState) -> Result<()> {
        let mut inner = self.inner.lock();
        let tracked = inner
            .segments
            .get_mut(&id)
            .ok_or_else(|| CdcError::invalid_state(format!("segment {id} is not tracked")))?;
        if !tracked.state.can_transition_to(next) {
            return Err(CdcError::invalid_state(format!(
                "segment {id} cannot move {} -> {next}",
                tracked.state
            )));
        }
        info!(segment = %id, from = %tracked.state, to = %next, "segment state change");
        tracked.state = next;
        Ok(())
    }
}
