//! Change event representation
//!
//! One row-level change produced by the translator. Cells are ordered:
//! primary-key cells first (table-defined order), then regular cells in
//! mutation order. The source position (segment index + mutation sequence)
//! rides on every event so downstream consumers can detect replays after an
//! at-least-once restart.

use serde::{Deserialize, Serialize};

use crate::common::cell::{CellData, CellValue};
use crate::common::schema::TableId;

/// Row-level operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Full-row write
    Insert,
    /// Partial-row write
    Update,
    /// Row-level delete
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Where in the commit log a mutation came from. Ordered by segment, then by
/// mutation sequence within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Segment index number
    pub segment_index: u64,
    /// Zero-based mutation sequence within the segment
    pub sequence: u64,
}

impl SourcePosition {
    pub fn new(segment_index: u64, sequence: u64) -> Self {
        Self {
            segment_index,
            sequence,
        }
    }
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment_index, self.sequence)
    }
}

/// Ordered cells of one row change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowData {
    pub cells: Vec<CellData>,
}

impl RowData {
    pub fn new(cells: Vec<CellData>) -> Self {
        Self { cells }
    }

    pub fn push(&mut self, cell: CellData) {
        self.cells.push(cell);
    }

    /// Primary-key cells in table-defined order.
    pub fn primary(&self) -> impl Iterator<Item = &CellData> {
        self.cells.iter().filter(|c| c.is_primary())
    }

    /// Regular cells in mutation order.
    pub fn regular(&self) -> impl Iterator<Item = &CellData> {
        self.cells.iter().filter(|c| !c.is_primary())
    }

    /// Look up a cell by column name.
    pub fn cell(&self, name: &str) -> Option<&CellData> {
        self.cells.iter().find(|c| c.name == name)
    }
}

/// A row-level change captured from the commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Source table identity
    pub table: TableId,
    /// Operation type
    pub op: Operation,
    /// Ordered cells: primary key first, then regular
    pub row: RowData,
    /// Row-level deletion timestamp (micros), set on deletes and on writes
    /// that fold a row delete into the same event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_deletion_ts: Option<i64>,
    /// Mutation timestamp (epoch micros)
    pub timestamp_micros: i64,
    /// Source position for downstream replay detection
    pub position: SourcePosition,
}

impl ChangeEvent {
    /// Create a new INSERT event
    pub fn insert(
        table: TableId,
        row: RowData,
        timestamp_micros: i64,
        position: SourcePosition,
    ) -> Self {
        Self {
            table,
            op: Operation::Insert,
            row,
            row_deletion_ts: None,
            timestamp_micros,
            position,
        }
    }

    /// Create a new UPDATE event
    pub fn update(
        table: TableId,
        row: RowData,
        timestamp_micros: i64,
        position: SourcePosition,
    ) -> Self {
        Self {
            table,
            op: Operation::Update,
            row,
            row_deletion_ts: None,
            timestamp_micros,
            position,
        }
    }

    /// Create a new DELETE event carrying only primary-key cells.
    pub fn delete(
        table: TableId,
        key_row: RowData,
        deletion_ts: i64,
        timestamp_micros: i64,
        position: SourcePosition,
    ) -> Self {
        Self {
            table,
            op: Operation::Delete,
            row: key_row,
            row_deletion_ts: Some(deletion_ts),
            timestamp_micros,
            position,
        }
    }

    /// Attach a row-level deletion timestamp folded into a write event.
    pub fn with_row_deletion_ts(mut self, ts: i64) -> Self {
        self.row_deletion_ts = Some(ts);
        self
    }

    /// Primary-key values in table-defined order.
    pub fn primary_key_values(&self) -> Vec<Option<&CellValue>> {
        self.row.primary().map(|c| c.value.as_ref()).collect()
    }
}
