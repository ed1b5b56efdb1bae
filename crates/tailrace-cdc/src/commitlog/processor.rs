//! The commit log processor
//!
//! One driving task owns the whole pipeline: scan the watch directory, admit
//! segments, and process them strictly in segment order. Per segment it polls
//! the index marker, decodes the confirmed region, translates mutations, and
//! hands events to the routed queue, recording the offset cursor after each
//! handoff. Completed segments are sealed and post-processed.
//!
//! The task suspends only at well-defined points: the discovery poll, the
//! marked-complete poll, the schema refresh wait, and queue backpressure.
//! Every suspension is shutdown-aware, so `stop` interrupts a blocked
//! producer without losing at-least-once delivery (an event dropped between
//! handoff and offset flush is simply replayed on restart).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::commitlog::decoder::{RawMutation, SegmentDecoder};
use crate::commitlog::index::IndexMarkerReader;
use crate::commitlog::lifecycle::{SegmentLifecycleManager, TrackedSegment};
use crate::commitlog::offsets::OffsetStore;
use crate::commitlog::segment::{scan_commit_logs, SegmentId};
use crate::commitlog::transfer::TransferRegistry;
use crate::commitlog::translate::MutationTranslator;
use crate::common::{
    queue_index_for, CdcError, ChangeEvent, ChangeEventQueue, CommitLogConfig, FieldFilter,
    Result, SchemaLookup, TableId,
};

/// Owns the segment pipeline and its driving task.
pub struct CommitLogProcessor {
    worker: Arc<Worker>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl CommitLogProcessor {
    /// Build a processor with the built-in transfers registered.
    pub fn new(config: CommitLogConfig, schema: Arc<dyn SchemaLookup>) -> Result<Self> {
        Self::with_registry(config, schema, &TransferRegistry::with_defaults())
    }

    /// Build a processor resolving the configured transfer against a caller
    /// supplied registry.
    pub fn with_registry(
        config: CommitLogConfig,
        schema: Arc<dyn SchemaLookup>,
        transfers: &TransferRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let transfer = transfers.create(&config.transfer, &config.transfer_properties)?;
        let offsets = Arc::new(OffsetStore::open(
            &config.offset_dir,
            config.offset_flush_interval,
            config.max_offset_flush_size,
        )?);
        let queues = (0..config.num_queues)
            .map(|_| Arc::new(ChangeEventQueue::new(config.max_queue_size)))
            .collect();
        let filter = FieldFilter::from_exclude_list(&config.field_exclude_list);
        let translator = MutationTranslator::new(schema, filter, config.tombstones_on_delete);
        let lifecycle = Arc::new(SegmentLifecycleManager::new(&config, transfer));

        Ok(Self {
            worker: Arc::new(Worker {
                config,
                queues,
                offsets,
                lifecycle,
                translator,
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the driving task. Must be called from a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.worker.running.swap(true, Ordering::SeqCst) {
            return Err(CdcError::invalid_state(
                "commit log processor already running",
            ));
        }
        let worker = Arc::clone(&self.worker);
        *self.handle.lock() = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Stop the driving task and wait for it to flush offsets and exit.
    /// Idempotent; returns the task's terminal error if it failed.
    pub async fn stop(&self) -> Result<()> {
        if !self.worker.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.worker.shutdown.notify_waiters();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(CdcError::invalid_state(format!(
                        "commit log processor task failed: {e}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.running.load(Ordering::SeqCst)
    }

    /// Inject one mutation directly, bypassing file discovery. Translation
    /// failures surface immediately (no schema retry loop) and no offset is
    /// recorded; durable cursors belong to the file-driven pipeline.
    pub async fn submit(&self, segment: SegmentId, mutation: &RawMutation) -> Result<usize> {
        let events = self.worker.translator.translate(segment, mutation)?;
        let count = events.len();
        for event in events {
            let index = queue_index_for(&event.table, self.worker.queues.len());
            self.worker.queues[index].offer(event).await;
        }
        Ok(count)
    }

    /// The change event queues, indexed as `queue_index_for` routes.
    pub fn queues(&self) -> &[Arc<ChangeEventQueue<ChangeEvent>>] {
        &self.worker.queues
    }

    /// The queue a table's events are routed to.
    pub fn queue_for(&self, table: &TableId) -> &Arc<ChangeEventQueue<ChangeEvent>> {
        &self.worker.queues[queue_index_for(table, self.worker.queues.len())]
    }

    pub fn offset_store(&self) -> &Arc<OffsetStore> {
        &self.worker.offsets
    }

    pub fn lifecycle(&self) -> &Arc<SegmentLifecycleManager> {
        &self.worker.lifecycle
    }

    pub fn config(&self) -> &CommitLogConfig {
        &self.worker.config
    }
}

/// State shared between the handle and the driving task.
struct Worker {
    config: CommitLogConfig,
    queues: Vec<Arc<ChangeEventQueue<ChangeEvent>>>,
    offsets: Arc<OffsetStore>,
    lifecycle: Arc<SegmentLifecycleManager>,
    translator: MutationTranslator,
    running: AtomicBool,
    shutdown: Notify,
}

impl Worker {
    async fn run(self: Arc<Self>) -> Result<()> {
        let mut markers = IndexMarkerReader::new();
        info!(
            dir = %self.config.commit_log_dir.display(),
            mode = if self.config.real_time_processing { "real-time" } else { "finalized" },
            queues = self.queues.len(),
            "commit log processor started"
        );

        while self.running.load(Ordering::SeqCst) {
            self.discover(&mut markers).await;
            self.retry_transfers().await;

            while self.running.load(Ordering::SeqCst) {
                let Some(next) = self.lifecycle.next_ready() else {
                    break;
                };
                if let Err(e) = self.process_segment(&mut markers, &next).await {
                    error!(segment = %next.id, error = %e, "segment processing aborted");
                    break;
                }
            }

            if !self.sleep_or_shutdown(self.config.dir_poll_interval).await {
                break;
            }
        }

        self.offsets.flush()?;
        info!("commit log processor stopped");
        Ok(())
    }

    /// Scan the watch directory and admit candidates. Finalized mode admits
    /// only segments whose marker already carries the completed token.
    async fn discover(&self, markers: &mut IndexMarkerReader) {
        let mut candidates = match scan_commit_logs(&self.config.commit_log_dir).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    dir = %self.config.commit_log_dir.display(),
                    error = %e,
                    "commit log scan failed"
                );
                return;
            }
        };

        if !self.config.real_time_processing {
            let mut ready = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let marker_path = candidate.id.marker_path(&candidate.path);
                if !tokio::fs::try_exists(&marker_path).await.unwrap_or(false) {
                    debug!(segment = %candidate.id, "no index marker yet");
                    continue;
                }
                let completed = markers
                    .read(candidate.id, &marker_path)
                    .await
                    .is_some_and(|m| m.completed);
                if completed {
                    ready.push(candidate);
                } else {
                    debug!(segment = %candidate.id, "segment not yet marked complete");
                }
            }
            candidates = ready;
        }

        self.lifecycle.admit(&candidates, &self.offsets);
    }

    /// Re-run the transfer for sealed segments left behind by an earlier
    /// failure or an interrupted run.
    async fn retry_transfers(&self) {
        for segment in self.lifecycle.sealed_pending_transfer() {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.lifecycle.post_process(segment.id).await {
                debug!(segment = %segment.id, error = %e, "transfer retry failed");
            }
        }
    }

    /// Process one segment to its terminal state, resuming from any stored
    /// cursor. Returns `Ok` even when the segment errors; the error is parked
    /// on the segment. An `Err` from here is a pipeline-level fault.
    async fn process_segment(
        &self,
        markers: &mut IndexMarkerReader,
        tracked: &TrackedSegment,
    ) -> Result<()> {
        let id = tracked.id;
        self.lifecycle.begin_reading(id)?;

        let resume = self.offsets.position_of(&id).unwrap_or_default();
        if resume.offset > 0 {
            info!(segment = %id, position = %resume, "resuming segment from stored cursor");
        }
        let mut decoder = match SegmentDecoder::open_at(id, &tracked.path, resume) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.lifecycle.mark_errored(id, &e)?;
                return Ok(());
            }
        };
        let marker_path = id.marker_path(&tracked.path);

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            let marker = markers.read(id, &marker_path).await;
            let safe_offset = marker
                .as_ref()
                .map_or(decoder.cursor().offset, |m| m.safe_offset);
            let completed = marker.as_ref().is_some_and(|m| m.completed);

            if let Err(e) = self.drain_confirmed(&mut decoder, safe_offset).await {
                if self.running.load(Ordering::SeqCst) {
                    self.lifecycle.mark_errored(id, &e)?;
                }
                return Ok(());
            }
            if !self.running.load(Ordering::SeqCst) {
                // A stop can interrupt the drain with the cursor short of the
                // marker; only a live run may treat that gap as corruption.
                return Ok(());
            }

            if completed {
                let cursor = decoder.cursor();
                if cursor.offset < safe_offset {
                    let e = CdcError::corrupt(
                        id.log_file_name(),
                        cursor.offset,
                        "segment ends mid-record inside the completed region",
                    );
                    self.lifecycle.mark_errored(id, &e)?;
                    return Ok(());
                }
                if let Err(e) = self.offsets.record_completed(&id, cursor) {
                    if self.running.load(Ordering::SeqCst) {
                        self.lifecycle.mark_errored(id, &e)?;
                    }
                    return Ok(());
                }
                markers.forget(&id);
                self.lifecycle.seal(id)?;
                info!(segment = %id, mutations = cursor.sequence, "segment sealed");
                if let Err(e) = self.lifecycle.post_process(id).await {
                    debug!(segment = %id, error = %e, "post-processing deferred");
                }
                return Ok(());
            }

            // Caught up to the confirmed region; wait for the marker to move.
            self.lifecycle.await_completion(id)?;
            if !self
                .sleep_or_shutdown(self.config.marked_complete_poll_interval)
                .await
            {
                return Ok(());
            }
            self.lifecycle.resume_reading(id)?;
        }
    }

    /// Decode, translate, and hand off everything inside the confirmed
    /// region. The offset cursor advances after each handed-off mutation.
    async fn drain_confirmed(&self, decoder: &mut SegmentDecoder, safe_offset: u64) -> Result<()> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            let Some(item) = decoder.decode_up_to(safe_offset).next() else {
                return Ok(());
            };
            let mutation = item?;
            let segment = decoder.segment();

            let events = self.translate_with_retry(segment, &mutation).await?;
            let count = events.len();
            for event in events {
                if !self.offer_event(event).await {
                    // Shutdown while blocked on backpressure. The cursor was
                    // not recorded, so restart replays this mutation.
                    return Ok(());
                }
            }
            self.offsets.record(&segment, mutation.cursor_after())?;
            trace!(
                segment = %segment,
                sequence = mutation.sequence,
                events = count,
                "handed off mutation"
            );
        }
    }

    /// Translate with a bounded wait for schema to become available. Any
    /// other translation failure surfaces immediately.
    async fn translate_with_retry(
        &self,
        segment: SegmentId,
        mutation: &RawMutation,
    ) -> Result<Vec<ChangeEvent>> {
        let mut attempt = 0u32;
        loop {
            match self.translator.translate(segment, mutation) {
                Err(e @ CdcError::SchemaUnavailable { .. })
                    if attempt < self.config.schema_retry_attempts =>
                {
                    attempt += 1;
                    warn!(
                        table = %mutation.table,
                        attempt,
                        max_attempts = self.config.schema_retry_attempts,
                        "schema unavailable, waiting for refresh"
                    );
                    if !self
                        .sleep_or_shutdown(self.config.schema_refresh_interval)
                        .await
                    {
                        return Err(e);
                    }
                }
                other => return other,
            }
        }
    }

    /// Offer with shutdown-aware backpressure. Returns false when shutdown
    /// interrupted the handoff.
    async fn offer_event(&self, event: ChangeEvent) -> bool {
        let index = queue_index_for(&event.table, self.queues.len());
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a stop between the check
        // and the await cannot be missed.
        notified.as_mut().enable();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        tokio::select! {
            biased;
            _ = &mut notified => false,
            _ = self.queues[index].offer(event) => true,
        }
    }

    /// Sleep that ends early on shutdown. Returns false when shutting down.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        tokio::select! {
            biased;
            _ = &mut notified => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
