//! Segment fixtures, schemas, and mutation generators

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tailrace_cdc::commitlog::{RawCell, RawMutation, SegmentHeader, SegmentId};
use tailrace_cdc::{
    ColumnSpec, CommitLogConfig, CommitLogConfigBuilder, DataType, SchemaRegistry, TableId,
    TableSchema,
};

pub fn orders_table() -> TableId {
    TableId::new("shop", "orders")
}

pub fn inventory_table() -> TableId {
    TableId::new("shop", "inventory")
}

/// Registry carrying the fixture tables.
pub fn fixture_registry() -> Arc<SchemaRegistry> {
    let registry = SchemaRegistry::new();
    registry.insert(orders_schema());
    registry.insert(inventory_schema());
    Arc::new(registry)
}

pub fn orders_schema() -> TableSchema {
    TableSchema::new(
        orders_table(),
        vec![
            ColumnSpec::partition("order_id", DataType::Bigint),
            ColumnSpec::regular("status", DataType::Text),
            ColumnSpec::regular("total", DataType::Double),
        ],
    )
    .unwrap()
}

pub fn inventory_schema() -> TableSchema {
    TableSchema::new(
        inventory_table(),
        vec![
            ColumnSpec::partition("sku", DataType::Text),
            ColumnSpec::regular("qty", DataType::Int),
        ],
    )
    .unwrap()
}

/// Full-row order write.
pub fn order_insert(order_id: i64, status: &str, total: f64, ts: i64) -> RawMutation {
    RawMutation::new(orders_table(), ts)
        .with_row_marker()
        .with_key(Bytes::copy_from_slice(&order_id.to_be_bytes()))
        .with_cell(RawCell::live("status", Bytes::copy_from_slice(status.as_bytes())))
        .with_cell(RawCell::live(
            "total",
            Bytes::copy_from_slice(&total.to_bits().to_be_bytes()),
        ))
}

/// Partial order write touching only `status`.
pub fn order_update(order_id: i64, status: &str, ts: i64) -> RawMutation {
    RawMutation::new(orders_table(), ts)
        .with_key(Bytes::copy_from_slice(&order_id.to_be_bytes()))
        .with_cell(RawCell::live("status", Bytes::copy_from_slice(status.as_bytes())))
}

/// Row-level order delete.
pub fn order_delete(order_id: i64, ts: i64) -> RawMutation {
    RawMutation::new(orders_table(), ts)
        .with_key(Bytes::copy_from_slice(&order_id.to_be_bytes()))
        .with_row_deletion(ts)
}

/// Full-row inventory write.
pub fn inventory_upsert(sku: &str, qty: i32, ts: i64) -> RawMutation {
    RawMutation::new(inventory_table(), ts)
        .with_row_marker()
        .with_key(Bytes::copy_from_slice(sku.as_bytes()))
        .with_cell(RawCell::live("qty", Bytes::copy_from_slice(&qty.to_be_bytes())))
}

/// Write a segment file under `dir`. Returns its path and the absolute byte
/// offset after each record, usable as marker safe offsets.
pub fn write_segment_file(
    dir: &Path,
    id: SegmentId,
    mutations: &[RawMutation],
) -> (PathBuf, Vec<u64>) {
    let mut buf = BytesMut::new();
    buf.put_slice(&SegmentHeader::new(id).encode());
    let mut record_ends = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        mutation.write_frame(&mut buf).unwrap();
        record_ends.push(buf.len() as u64);
    }
    let path = dir.join(id.log_file_name());
    std::fs::write(&path, &buf).unwrap();
    (path, record_ends)
}

/// Write (or overwrite) the index marker beside `log_path`.
pub fn write_marker(log_path: &Path, id: SegmentId, safe_offset: u64, completed: bool) {
    let text = if completed {
        format!("{safe_offset}\nCOMPLETED\n")
    } else {
        format!("{safe_offset}\n")
    };
    std::fs::write(id.marker_path(log_path), text).unwrap();
}

/// Flip one byte in a fixture file.
pub fn corrupt_byte(path: &Path, offset: u64) {
    let mut raw = std::fs::read(path).unwrap();
    raw[offset as usize] ^= 0xFF;
    std::fs::write(path, &raw).unwrap();
}

/// Config builder with tempdir paths and intervals tight enough for tests.
/// The commit log directory is created; the offset directory is left to the
/// offset store.
pub fn fast_config(root: &Path) -> CommitLogConfigBuilder {
    let commit_log_dir = root.join("cdc_raw");
    std::fs::create_dir_all(&commit_log_dir).unwrap();
    CommitLogConfig::builder()
        .commit_log_dir(commit_log_dir)
        .offset_dir(root.join("offsets"))
        .dir_poll_interval(Duration::from_millis(25))
        .marked_complete_poll_interval(Duration::from_millis(25))
        .schema_refresh_interval(Duration::from_millis(50))
        .offset_flush_interval(Duration::ZERO)
}
