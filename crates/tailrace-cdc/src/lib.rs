//! # tailrace-cdc - Commit Log Change Data Capture
//!
//! Tails a database's append-only commit log directory and turns finalized
//! segment bytes into ordered, typed change events with at-least-once
//! delivery. The write path stays untouched: the database hard-links segment
//! files into a watch directory and reports durable progress through small
//! per-segment index marker files; this crate only ever reads.
//!
//! ## Features
//!
//! - Segment discovery with strict `(index, generation)` ordering
//! - Index marker protocol: safe-offset polling plus the `COMPLETED` token
//! - CRC-framed binary decoding that never reads past the confirmed region
//! - Schema-driven translation into INSERT / UPDATE / DELETE row events
//! - Durable offset cursors for crash-safe, at-least-once resumption
//! - Bounded multi-queue handoff with table-hash routing and backpressure
//! - Pluggable post-processing: delete, archive, or keep sealed segments
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │   watch dir      │      │  _cdc.idx files  │
//! │ commitlog-*.log  │      │ offset+COMPLETED │
//! └────────┬─────────┘      └────────┬─────────┘
//!          │ discovery               │ marker polling
//!          ▼                         ▼
//! ┌─────────────────────────────────────────────┐
//! │            CommitLogProcessor               │
//! │  lifecycle -> decode -> translate -> route  │
//! └───────┬─────────────────────────┬───────────┘
//!         │ cursors                 │ events
//!         ▼                         ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │   OffsetStore    │      │ ChangeEventQueue │
//! │   offsets.json   │      │   (bounded, N)   │
//! └──────────────────┘      └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> tailrace_cdc::Result<()> {
//! use std::sync::Arc;
//! use tailrace_cdc::{
//!     ColumnSpec, CommitLogConfig, CommitLogProcessor, DataType, SchemaRegistry, TableId,
//!     TableSchema,
//! };
//!
//! let schema = Arc::new(SchemaRegistry::new());
//! schema.insert(TableSchema::new(
//!     TableId::new("shop", "orders"),
//!     vec![
//!         ColumnSpec::partition("order_id", DataType::Bigint),
//!         ColumnSpec::regular("status", DataType::Text),
//!     ],
//! )?);
//!
//! let config = CommitLogConfig::builder()
//!     .commit_log_dir("/var/lib/db/cdc_raw")
//!     .offset_dir("/var/lib/tailrace/offsets")
//!     .build()?;
//!
//! let processor = CommitLogProcessor::new(config, schema)?;
//! processor.start()?;
//!
//! // Consumers drain the bounded queues; order within a queue follows the
//! // commit log.
//! for event in processor.queues()[0].poll() {
//!     println!("{} {} at {}", event.op, event.table, event.position);
//! }
//!
//! processor.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! This crate exposes types in three tiers:
//!
//! ### Tier 1: Core Types (crate root)
//! Essential types for running the pipeline - `CommitLogProcessor`,
//! `CommitLogConfig`, `ChangeEvent`, `CdcError`.
//!
//! ### Tier 2: Integration Types (crate root)
//! Schema supply, queue consumption, and transfer customization.
//!
//! ### Tier 3: Pipeline Internals (`commitlog` module)
//! Decoder, marker reader, lifecycle, and offset store for embedders that
//! drive segments themselves - accessed via `commitlog::*`.

pub mod commitlog;
pub mod common;

// =============================================================================
// TIER 1: Core Types - Essential for running the pipeline
// =============================================================================

pub use commitlog::CommitLogProcessor;
pub use common::{
    // Error handling
    CdcError,
    // Emitted data model
    CellData,
    CellValue,
    ChangeEvent,
    // Configuration
    CommitLogConfig,
    CommitLogConfigBuilder,
    ErrorCategory,
    Operation,
    Result,
    RowData,
    SourcePosition,
};

// =============================================================================
// TIER 2: Integration Types - Schema supply, consumption, customization
// =============================================================================

// Schema supply
pub use common::{
    ColumnKind, ColumnSpec, DataType, SchemaLookup, SchemaRegistry, TableId, TableSchema,
};

// Queue consumption and routing
pub use common::{queue_index_for, ChangeEventQueue, FieldFilter, QueueStatsSnapshot};

// Segment identity and transfer customization
pub use commitlog::{
    CommitLogTransfer, SegmentId, SegmentState, TransferFactory, TransferRegistry,
};

// =============================================================================
// TIER 3: Pipeline Internals - Available via `commitlog::` module
// =============================================================================
// The following are NOT re-exported at crate root but accessible via
// `commitlog::`:
//
// Decoding (for fixture authoring and custom drivers):
//   - commitlog::SegmentDecoder, SegmentHeader, RawMutation, RawCell
//   - commitlog::SEGMENT_MAGIC, SEGMENT_HEADER_SIZE, MAX_MUTATION_SIZE
//
// Marker protocol:
//   - commitlog::IndexMarker, IndexMarkerReader, COMPLETED_TOKEN
//
// Lifecycle and offsets (for embedders driving segments themselves):
//   - commitlog::SegmentLifecycleManager, TrackedSegment
//   - commitlog::OffsetStore, OffsetEntry, Cursor
//
// Discovery:
//   - commitlog::scan_commit_logs, DiscoveredSegment
