//! Basic Commit Log Capture Example
//!
//! Self-contained: seeds a demo segment and its completed index marker on
//! disk through the public codec API, then runs a [`CommitLogProcessor`]
//! over it and prints every change event. No database required.
//!
//! Run with:
//! ```
//! cargo run --example basic_capture
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tailrace_cdc::commitlog::{RawCell, RawMutation, SegmentHeader, SegmentId};
use tailrace_cdc::{
    ChangeEvent, ChangeEventQueue, ColumnSpec, CommitLogConfig, CommitLogProcessor, DataType,
    SchemaRegistry, TableId, TableSchema,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Fresh demo directories on every run.
    let root = std::env::temp_dir().join("tailrace-basic-capture");
    let _ = std::fs::remove_dir_all(&root);
    let commit_log_dir = root.join("cdc_raw");
    std::fs::create_dir_all(&commit_log_dir)?;

    let table = TableId::new("demo", "users");
    let segment = seed_segment(&commit_log_dir, &table)?;
    println!("Seeded segment {segment} under {}", commit_log_dir.display());

    let registry = SchemaRegistry::new();
    registry.insert(TableSchema::new(
        table.clone(),
        vec![
            ColumnSpec::partition("id", DataType::Bigint),
            ColumnSpec::regular("name", DataType::Text),
            ColumnSpec::regular("email", DataType::Text),
        ],
    )?);

    let config = CommitLogConfig::builder()
        .commit_log_dir(commit_log_dir)
        .offset_dir(root.join("offsets"))
        .build()?;

    let processor = CommitLogProcessor::new(config, Arc::new(registry))?;
    processor.start()?;
    println!("Listening for change events (ctrl-c to stop)...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = print_events(processor.queue_for(&table)) => {}
    }

    processor.stop().await?;
    Ok(())
}

async fn print_events(queue: &ChangeEventQueue<ChangeEvent>) {
    loop {
        for event in queue.poll() {
            println!("{} {} at {}: {:?}", event.op, event.table, event.position, event.row);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Write one segment holding an insert, an update, and a delete, plus the
/// marker confirming the whole file.
fn seed_segment(dir: &Path, table: &TableId) -> anyhow::Result<SegmentId> {
    let segment = SegmentId::new(1, 1);
    let key = Bytes::copy_from_slice(&1i64.to_be_bytes());
    let mutations = vec![
        RawMutation::new(table.clone(), 1_000)
            .with_row_marker()
            .with_key(key.clone())
            .with_cell(RawCell::live("name", Bytes::from_static(b"ada")))
            .with_cell(RawCell::live("email", Bytes::from_static(b"ada@example.com"))),
        RawMutation::new(table.clone(), 1_001)
            .with_key(key.clone())
            .with_cell(RawCell::live("email", Bytes::from_static(b"ada@demo.io"))),
        RawMutation::new(table.clone(), 1_002)
            .with_key(key)
            .with_row_deletion(1_002),
    ];

    let mut buf = BytesMut::new();
    buf.put_slice(&SegmentHeader::new(segment).encode());
    for mutation in &mutations {
        mutation.write_frame(&mut buf)?;
    }
    let log_path = dir.join(segment.log_file_name());
    std::fs::write(&log_path, &buf)?;
    std::fs::write(
        segment.marker_path(&log_path),
        format!("{}\nCOMPLETED\n", buf.len()),
    )?;
    Ok(segment)
}
