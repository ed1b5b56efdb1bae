//! # Commit Log Pipeline
//!
//! Everything between a segment file on disk and a routed change event:
//!
//! - [`scan_commit_logs`] / [`SegmentId`] - segment discovery and naming
//! - [`IndexMarkerReader`] - the `_cdc.idx` safe-offset/COMPLETED protocol
//! - [`SegmentDecoder`] - restartable binary decoding up to the safe offset
//! - [`MutationTranslator`] - schema resolution and event classification
//! - [`OffsetStore`] - durable per-segment cursors (at-least-once)
//! - [`SegmentLifecycleManager`] - state machine and admission policy
//! - [`CommitLogTransfer`] - post-processing of sealed segments
//! - [`CommitLogProcessor`] - the driving task wiring it all together
//!
//! ## Segment states
//!
//! ```text
//! DISCOVERED -> READING <-> AWAITING_COMPLETION
//!                  |   \________
//!                  v            v
//!               ERRORED <--- SEALED -> TRANSFERRED
//! ```
//!
//! `AWAITING_COMPLETION` only occurs with real-time processing enabled; the
//! default finalized mode admits a segment once its marker carries the
//! `COMPLETED` token.

pub mod decoder;
pub mod index;
pub mod lifecycle;
pub mod offsets;
pub mod processor;
pub mod segment;
pub mod transfer;
pub mod translate;

pub use decoder::{
    ByteSpan, RawCell, RawMutation, SegmentDecoder, SegmentHeader, FORMAT_VERSION,
    MAX_MUTATION_SIZE, SEGMENT_HEADER_SIZE, SEGMENT_MAGIC,
};
pub use index::{IndexMarker, IndexMarkerReader, COMPLETED_TOKEN};
pub use lifecycle::{SegmentLifecycleManager, TrackedSegment};
pub use offsets::{OffsetEntry, OffsetStore};
pub use processor::CommitLogProcessor;
pub use segment::{
    scan_commit_logs, Cursor, DiscoveredSegment, SegmentId, SegmentState, LOG_SUFFIX,
    MARKER_SUFFIX,
};
pub use transfer::{
    ArchiveTransfer, CommitLogTransfer, DeleteTransfer, NoopTransfer, TransferFactory,
    TransferRegistry, ARCHIVE_TRANSFER, DELETE_TRANSFER, NOOP_TRANSFER, RELOCATION_DIR_PROPERTY,
};
pub use translate::MutationTranslator;
