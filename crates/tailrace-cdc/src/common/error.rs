//! Error types for commit-log CDC operations
//!
//! Includes error classification for retry decisions and alerting. Segment-level
//! failures carry enough context (segment name, byte offset) to pinpoint the
//! exact record that broke.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Checksum or structural failure inside a segment's confirmed-safe region
    Corruption,
    /// Schema-related errors (missing schema, key arity, type mapping)
    Schema,
    /// Index marker read/parse races
    Marker,
    /// Post-processing transfer failures
    Transfer,
    /// Offset persistence failures
    Offset,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Serialization errors (JSON, payload codec)
    Serialization,
    /// Other/unknown errors
    Other,
}

/// Commit-log CDC errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Checksum or structural failure strictly inside the confirmed-safe region.
    /// Fatal for the segment; the offset names the first untrusted byte.
    #[error("Corrupt segment {segment} at offset {offset}: {reason}")]
    CorruptSegment {
        segment: String,
        offset: u64,
        reason: String,
    },

    /// No schema available for the mutation's table. Transient; callers retry
    /// on the schema refresh cadence before reporting.
    #[error("No schema available for table {table}")]
    SchemaUnavailable { table: String },

    /// Schema mismatch (key arity, unexpected primary-key delta, type width)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Index marker could not be read or parsed. Transient; the reader reuses
    /// the previous known value instead of escalating.
    #[error("Marker unreadable for {segment}: {reason}")]
    MarkerUnreadable { segment: String, reason: String },

    /// Transfer hook failed. The segment stays sealed and its file intact.
    #[error("Transfer failed for {segment}: {reason}")]
    TransferFailure { segment: String, reason: String },

    /// Offset flush failed. Fatal for the affected segment's ingestion.
    #[error("Offset persist error: {0}")]
    OffsetPersist(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File name does not match the segment naming convention
    #[error("Invalid segment name: {0}")]
    InvalidSegmentName(String),

    /// Invalid lifecycle state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Mutation payload codec error, before segment context is attached
    #[error("Codec error: {0}")]
    Codec(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CdcError {
    /// Create a corrupt-segment error carrying the exact failure offset.
    pub fn corrupt(segment: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptSegment {
            segment: segment.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Create a schema-unavailable error for a fully-qualified table name.
    pub fn schema_unavailable(table: impl Into<String>) -> Self {
        Self::SchemaUnavailable {
            table: table.into(),
        }
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a marker-unreadable error
    pub fn marker_unreadable(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MarkerUnreadable {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Create a transfer-failure error
    pub fn transfer_failure(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransferFailure {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Create an offset-persist error
    pub fn offset_persist(msg: impl Into<String>) -> Self {
        Self::OffsetPersist(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a payload codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient conditions that may succeed on a later poll
    /// without operator intervention. Corrupt segments and offset-persist
    /// failures are excluded: re-admitting those is a policy decision owned by
    /// the lifecycle manager, not a property of the error itself.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::SchemaUnavailable { .. } => true,
            Self::MarkerUnreadable { .. } => true,
            Self::TransferFailure { .. } => true,

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
                )
            }

            Self::CorruptSegment { .. }
            | Self::Schema(_)
            | Self::OffsetPersist(_)
            | Self::Config(_)
            | Self::InvalidSegmentName(_)
            | Self::InvalidState(_)
            | Self::Codec(_)
            | Self::Json(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CorruptSegment { .. } => ErrorCategory::Corruption,
            Self::SchemaUnavailable { .. } => ErrorCategory::Schema,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::MarkerUnreadable { .. } => ErrorCategory::Marker,
            Self::TransferFailure { .. } => ErrorCategory::Transfer,
            Self::OffsetPersist(_) => ErrorCategory::Offset,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::InvalidSegmentName(_) => ErrorCategory::Configuration,
            Self::InvalidState(_) => ErrorCategory::Other,
            Self::Codec(_) => ErrorCategory::Serialization,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CorruptSegment { .. } => "corrupt_segment",
            Self::SchemaUnavailable { .. } => "schema_unavailable",
            Self::Schema(_) => "schema_error",
            Self::MarkerUnreadable { .. } => "marker_unreadable",
            Self::TransferFailure { .. } => "transfer_failure",
            Self::OffsetPersist(_) => "offset_persist",
            Self::Config(_) => "config_error",
            Self::InvalidSegmentName(_) => "invalid_segment_name",
            Self::InvalidState(_) => "invalid_state",
            Self::Codec(_) => "codec_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
        }
    }
}

/// Result type for commit-log CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;
