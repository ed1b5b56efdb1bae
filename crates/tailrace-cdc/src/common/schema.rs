//! Table schema model and lookup seam
//!
//! The pipeline decodes key and cell bytes against externally-supplied table
//! schema. The [`SchemaLookup`] trait is the read-only seam the translator
//! calls into; [`SchemaRegistry`] is the in-memory implementation, updated
//! out-of-band (DDL listeners, admin APIs) while lookups proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::cell::{CellValue, ColumnKind};
use crate::common::error::{CdcError, Result};

/// Fully-qualified table identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub keyspace: String,
    pub table: String,
}

impl TableId {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

/// Logical column type. Values arrive as raw bytes in the mutation payload and
/// are decoded by fixed width (numerics) or by content (text, blob).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Bigint,
    Boolean,
    Double,
    Text,
    Uuid,
    Timestamp,
    Blob,
}

impl DataType {
    /// Decode a raw value of this type. Width or encoding mismatches are
    /// schema errors: the bytes already passed record-level CRC, so a bad
    /// width means the schema no longer matches what was written.
    pub fn decode(&self, raw: &[u8]) -> Result<CellValue> {
        match self {
            DataType::Int => Ok(CellValue::Int(i32::from_be_bytes(fixed(raw, *self)?))),
            DataType::Bigint => Ok(CellValue::Bigint(i64::from_be_bytes(fixed(raw, *self)?))),
            DataType::Boolean => {
                let b: [u8; 1] = fixed(raw, *self)?;
                Ok(CellValue::Boolean(b[0] != 0))
            }
            DataType::Double => Ok(CellValue::Double(f64::from_bits(u64::from_be_bytes(
                fixed(raw, *self)?,
            )))),
            DataType::Text => match std::str::from_utf8(raw) {
                Ok(s) => Ok(CellValue::Text(s.to_string())),
                Err(e) => Err(CdcError::schema(format!("invalid utf-8 in text value: {e}"))),
            },
            DataType::Uuid => {
                let b: [u8; 16] = fixed(raw, *self)?;
                Ok(CellValue::Uuid(Uuid::from_bytes(b)))
            }
            DataType::Timestamp => Ok(CellValue::Timestamp(i64::from_be_bytes(fixed(
                raw, *self,
            )?))),
            DataType::Blob => Ok(CellValue::Blob(raw.to_vec())),
        }
    }
}

fn fixed<const N: usize>(raw: &[u8], dt: DataType) -> Result<[u8; N]> {
    raw.try_into().map_err(|_| {
        CdcError::schema(format!(
            "type {dt:?} expects {N} bytes, got {}",
            raw.len()
        ))
    })
}

/// One column's declaration within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind,
        }
    }

    pub fn partition(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, ColumnKind::Partition)
    }

    pub fn clustering(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, ColumnKind::Clustering)
    }

    pub fn regular(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, ColumnKind::Regular)
    }
}

/// A table's column layout in table-defined order. Partition and clustering
/// columns, in declaration order, form the primary key; mutation payloads
/// carry key values in exactly that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableId,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// Build a schema, rejecting layouts the decoder cannot work with.
    pub fn new(table: TableId, columns: Vec<ColumnSpec>) -> Result<Self> {
        if !columns.iter().any(|c| c.kind == ColumnKind::Partition) {
            return Err(CdcError::schema(format!(
                "table {table} has no partition key column"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(CdcError::schema(format!(
                    "table {table} declares column {} twice",
                    col.name
                )));
            }
        }
        Ok(Self { table, columns })
    }

    /// Primary-key columns in table-defined order: partition first, then
    /// clustering.
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Partition)
            .chain(
                self.columns
                    .iter()
                    .filter(|c| c.kind == ColumnKind::Clustering),
            )
    }

    /// Non-key columns in table-defined order.
    pub fn regular_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.kind == ColumnKind::Regular)
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Read-only schema resolution seam used by the translator. Implementations
/// must be non-blocking and tolerate concurrent lookups.
pub trait SchemaLookup: Send + Sync {
    fn lookup(&self, table: &TableId) -> Option<Arc<TableSchema>>;
}

/// In-memory schema registry. Lookups take a read lock; updates arrive
/// out-of-band through `insert`/`remove`.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    inner: RwLock<HashMap<TableId, Arc<TableSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table's schema.
    pub fn insert(&self, schema: TableSchema) {
        let table = schema.table.clone();
        self.inner.write().insert(table, Arc::new(schema));
    }

    /// Drop a table's schema.
    pub fn remove(&self, table: &TableId) -> bool {
        self.inner.write().remove(table).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl SchemaLookup for SchemaRegistry {
    fn lookup(&self, table: &TableId) -> Option<Arc<TableSchema>> {
        self.inner.read().get(table).cloned()
    }
}
