//! Cell-level change representation
//!
//! A mutation decodes into cells: one per affected column, each carrying the
//! column's decoded value, an optional cell-level deletion timestamp, and the
//! column's key role. Partition and clustering cells together form the row's
//! primary key and always appear in table-defined order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key role of a column within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnKind {
    /// Part of the partition key
    Partition,
    /// Part of the clustering key
    Clustering,
    /// Non-key column
    Regular,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Partition => write!(f, "PARTITION"),
            ColumnKind::Clustering => write!(f, "CLUSTERING"),
            ColumnKind::Regular => write!(f, "REGULAR"),
        }
    }
}

/// A decoded, typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellValue {
    Int(i32),
    Bigint(i64),
    Boolean(bool),
    Double(f64),
    Text(String),
    Uuid(Uuid),
    /// Epoch milliseconds
    Timestamp(i64),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Integer view across the numeric variants, used by tests asserting on
    /// key values without caring about the declared width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v as i64),
            CellValue::Bigint(v) => Some(*v),
            CellValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// String view for text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A single column's change within one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellData {
    /// Column name
    pub name: String,
    /// Decoded value; `None` for key-only deletes and tombstoned cells
    pub value: Option<CellValue>,
    /// Cell-level logical delete timestamp, distinct from a row-level delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_ts: Option<i64>,
    /// Key role of the column
    pub kind: ColumnKind,
}

impl CellData {
    /// Create a live cell carrying a value.
    pub fn new(name: impl Into<String>, value: Option<CellValue>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            value,
            deletion_ts: None,
            kind,
        }
    }

    /// Create a tombstoned cell (value logically deleted at `deletion_ts`).
    pub fn tombstone(name: impl Into<String>, deletion_ts: i64, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            value: None,
            deletion_ts: Some(deletion_ts),
            kind,
        }
    }

    /// Whether this cell is part of the primary key.
    pub fn is_primary(&self) -> bool {
        matches!(self.kind, ColumnKind::Partition | ColumnKind::Clustering)
    }

    /// Whether this cell carries a cell-level deletion.
    pub fn is_tombstoned(&self) -> bool {
        self.deletion_ts.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_primary() {
        let p = CellData::new("a", Some(CellValue::Int(1)), ColumnKind::Partition);
        let c = CellData::new("b", Some(CellValue::Int(2)), ColumnKind::Clustering);
        let r = CellData::new("c", Some(CellValue::Text("x".into())), ColumnKind::Regular);

        assert!(p.is_primary());
        assert!(c.is_primary());
        assert!(!r.is_primary());
    }

    #[test]
    fn test_tombstone_cell() {
        let cell = CellData::tombstone("c", 1_700_000_000_000_000, ColumnKind::Regular);
        assert!(cell.value.is_none());
        assert!(cell.is_tombstoned());
        assert_eq!(cell.deletion_ts, Some(1_700_000_000_000_000));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(CellValue::Int(7).as_i64(), Some(7));
        assert_eq!(CellValue::Bigint(-3).as_i64(), Some(-3));
        assert_eq!(CellValue::Text("hi".into()).as_str(), Some("hi"));
        assert_eq!(CellValue::Boolean(true).as_i64(), None);
    }

    #[test]
    fn test_cell_serialization_omits_empty_deletion() {
        let cell = CellData::new("a", Some(CellValue::Int(1)), ColumnKind::Partition);
        let json = serde_json::to_string(&cell).unwrap();
        assert!(!json.contains("deletion_ts"));

        let parsed: CellData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cell);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ColumnKind::Partition.to_string(), "PARTITION");
        assert_eq!(ColumnKind::Clustering.to_string(), "CLUSTERING");
        assert_eq!(ColumnKind::Regular.to_string(), "REGULAR");
    }
}
