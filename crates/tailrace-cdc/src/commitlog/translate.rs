//! Raw mutation to change event translation
//!
//! Resolves key and cell bytes against table schema and classifies each
//! mutation into INSERT, UPDATE, or DELETE events. Schema arrives through the
//! [`SchemaLookup`] seam; a missing table is transient (the registry may not
//! have refreshed yet) while a key arity or type-width mismatch means the
//! registry's schema no longer matches what was written, which no retry fixes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::commitlog::decoder::RawMutation;
use crate::commitlog::segment::SegmentId;
use crate::common::{
    CdcError, CellData, ChangeEvent, ColumnKind, FieldFilter, Result, RowData, SchemaLookup,
    SourcePosition, TableId,
};

/// Translates decoded mutations into typed change events.
pub struct MutationTranslator {
    schema: Arc<dyn SchemaLookup>,
    filter: FieldFilter,
    tombstones_on_delete: bool,
}

impl MutationTranslator {
    pub fn new(
        schema: Arc<dyn SchemaLookup>,
        filter: FieldFilter,
        tombstones_on_delete: bool,
    ) -> Self {
        Self {
            schema,
            filter,
            tombstones_on_delete,
        }
    }

    /// Translate one mutation into its change events, in emission order.
    ///
    /// Most mutations yield exactly one event. A mutation combining a row
    /// deletion with live cells yields a delete-then-write pair when
    /// `tombstones.on.delete` is enabled, otherwise a single write event with
    /// the deletion timestamp folded in.
    pub fn translate(
        &self,
        segment: SegmentId,
        mutation: &RawMutation,
    ) -> Result<Vec<ChangeEvent>> {
        let schema = self
            .schema
            .lookup(&mutation.table)
            .ok_or_else(|| CdcError::schema_unavailable(mutation.table.to_string()))?;

        let pk_specs: Vec<_> = schema.primary_key().collect();
        if pk_specs.len() != mutation.key_values.len() {
            return Err(CdcError::schema(format!(
                "table {} declares {} primary key columns, mutation carries {} key values",
                mutation.table,
                pk_specs.len(),
                mutation.key_values.len()
            )));
        }

        let mut key_cells = Vec::with_capacity(pk_specs.len());
        for (spec, raw) in pk_specs.iter().zip(&mutation.key_values) {
            let value = spec.data_type.decode(raw)?;
            key_cells.push(CellData::new(&spec.name, Some(value), spec.kind));
        }

        let mut regular_cells = Vec::new();
        for cell in &mutation.cells {
            let Some(spec) = schema.column(&cell.name) else {
                warn!(
                    table = %mutation.table,
                    column = %cell.name,
                    "skipping cell for column not in schema"
                );
                continue;
            };
            if spec.kind != ColumnKind::Regular {
                // Key values travel in the key section. A key column showing
                // up as a cell delta means the schema and the writer disagree
                // about the table's key layout.
                return Err(CdcError::schema(format!(
                    "table {} delivered {} key column {} as a cell delta",
                    mutation.table, spec.kind, cell.name
                )));
            }
            if self.filter.is_excluded(&mutation.table, &cell.name) {
                debug!(table = %mutation.table, column = %cell.name, "excluded by field filter");
                continue;
            }
            let data = match (&cell.value, cell.deletion_ts) {
                (Some(raw), None) => {
                    CellData::new(&spec.name, Some(spec.data_type.decode(raw)?), spec.kind)
                }
                (None, Some(ts)) => CellData::tombstone(&spec.name, ts, spec.kind),
                _ => {
                    return Err(CdcError::codec(format!(
                        "cell {} must be exactly one of live or tombstoned",
                        cell.name
                    )))
                }
            };
            regular_cells.push(data);
        }

        let position = SourcePosition::new(segment.index, mutation.sequence);
        let table = mutation.table.clone();
        let ts = mutation.timestamp_micros;

        if let Some(deletion_ts) = mutation.row_deletion_ts {
            if !mutation.has_live_cells() {
                // The row deletion supersedes any cell tombstones riding in
                // the same mutation: emit one key-only delete.
                return Ok(vec![ChangeEvent::delete(
                    table,
                    RowData::new(key_cells),
                    deletion_ts,
                    ts,
                    position,
                )]);
            }

            if self.tombstones_on_delete {
                let delete = ChangeEvent::delete(
                    table.clone(),
                    RowData::new(key_cells.clone()),
                    deletion_ts,
                    ts,
                    position,
                );
                let write = self.write_event(table, mutation, key_cells, regular_cells, position);
                return Ok(vec![delete, write]);
            }

            let write = self
                .write_event(table, mutation, key_cells, regular_cells, position)
                .with_row_deletion_ts(deletion_ts);
            return Ok(vec![write]);
        }

        Ok(vec![self.write_event(
            table,
            mutation,
            key_cells,
            regular_cells,
            position,
        )])
    }

    fn write_event(
        &self,
        table: TableId,
        mutation: &RawMutation,
        key_cells: Vec<CellData>,
        regular_cells: Vec<CellData>,
        position: SourcePosition,
    ) -> ChangeEvent {
        let mut cells = key_cells;
        cells.extend(regular_cells);
        let row = RowData::new(cells);
        if mutation.row_marker {
            ChangeEvent::insert(table, row, mutation.timestamp_micros, position)
        } else {
            ChangeEvent::update(table, row, mutation.timestamp_micros, position)
        }
    }
}
