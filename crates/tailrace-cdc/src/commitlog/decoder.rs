//! Segment binary format and the restartable decoder
//!
//! A segment file is a 28-byte header followed by CRC-framed mutation
//! records:
//!
//! ```text
//! Header:  [Magic: 4][Version: 2][Flags: 2][Index: 8][Generation: 8][CRC: 4]
//! Record:  [Len: 4][Payload: Len][CRC32(Payload): 4]
//! ```
//!
//! Marker offsets are absolute file offsets, so the header counts toward the
//! safe offset. Encode and decode live on the same types: fixtures and tests
//! author real segment files through the public API, the same way the format
//! is consumed.
//!
//! [`SegmentDecoder`] is pull-based and restartable. Each `decode_up_to`
//! resumes from the exact cursor the previous call left, refuses to consume
//! past the limit, and distinguishes "record not fully confirmed yet" (stop,
//! not an error) from corruption strictly inside the confirmed region
//! (`CorruptSegment` with the exact byte offset).

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::commitlog::segment::{Cursor, SegmentId};
use crate::common::{CdcError, Result, TableId};

/// Magic prefix of every segment file ("CLOG").
pub const SEGMENT_MAGIC: u32 = 0x434C_4F47;
/// Current segment format version.
pub const FORMAT_VERSION: u16 = 1;
/// Encoded header size in bytes.
pub const SEGMENT_HEADER_SIZE: u64 = 28;
/// Frame bytes around each payload: length prefix plus CRC trailer.
pub const RECORD_FRAME_OVERHEAD: u64 = 8;
/// Upper bound on a single mutation payload. Anything larger inside the
/// confirmed region is structural corruption, not data.
pub const MAX_MUTATION_SIZE: u32 = 16 * 1024 * 1024;

const FLAG_ROW_DELETION: u8 = 0b0000_0001;
const FLAG_ROW_MARKER: u8 = 0b0000_0010;
const CELL_FLAG_VALUE: u8 = 0b0000_0001;
const CELL_FLAG_TOMBSTONE: u8 = 0b0000_0010;

/// Fixed header identifying a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub index: u64,
    pub generation: i64,
}

impl SegmentHeader {
    pub fn new(id: SegmentId) -> Self {
        Self {
            index: id.index,
            generation: id.generation,
        }
    }

    /// Encode the header, CRC included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SEGMENT_HEADER_SIZE as usize);
        buf.put_u32(SEGMENT_MAGIC);
        buf.put_u16(FORMAT_VERSION);
        buf.put_u16(0);
        buf.put_u64(self.index);
        buf.put_i64(self.generation);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        buf.put_u32(hasher.finalize());
        buf.freeze()
    }

    /// Decode and verify a header.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < SEGMENT_HEADER_SIZE as usize {
            return Err(CdcError::codec("segment header truncated"));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&raw[..24]);
        let computed = hasher.finalize();

        let mut buf = &raw[..SEGMENT_HEADER_SIZE as usize];
        let magic = buf.get_u32();
        if magic != SEGMENT_MAGIC {
            return Err(CdcError::codec(format!(
                "bad segment magic {magic:#010x}"
            )));
        }
        let version = buf.get_u16();
        if version != FORMAT_VERSION {
            return Err(CdcError::codec(format!(
                "unsupported segment format version {version}"
            )));
        }
        let flags = buf.get_u16();
        if flags != 0 {
            return Err(CdcError::codec(format!(
                "unsupported segment header flags {flags:#06x}"
            )));
        }
        let index = buf.get_u64();
        let generation = buf.get_i64();
        let stored = buf.get_u32();
        if stored != computed {
            return Err(CdcError::codec("segment header crc mismatch"));
        }
        Ok(Self { index, generation })
    }
}

/// One column delta inside a raw mutation: either a live value or a cell
/// tombstone, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    pub name: String,
    pub value: Option<Bytes>,
    pub deletion_ts: Option<i64>,
}

impl RawCell {
    /// A live write of `value`.
    pub fn live(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            deletion_ts: None,
        }
    }

    /// A cell-level tombstone written at `deletion_ts`.
    pub fn tombstone(name: impl Into<String>, deletion_ts: i64) -> Self {
        Self {
            name: name.into(),
            value: None,
            deletion_ts: Some(deletion_ts),
        }
    }
}

/// Byte span a mutation occupied in its segment, frame overhead included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub len: u64,
}

/// One decoded mutation, still untyped: key and cell values are raw bytes
/// until the translator resolves them against schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMutation {
    pub table: TableId,
    /// Mutation timestamp (epoch micros)
    pub timestamp_micros: i64,
    /// Present on full-row writes; distinguishes INSERT from UPDATE
    pub row_marker: bool,
    /// Row-level deletion timestamp (micros)
    pub row_deletion_ts: Option<i64>,
    /// Primary-key values in table-defined order
    pub key_values: Vec<Bytes>,
    /// Column deltas in write order
    pub cells: Vec<RawCell>,
    /// Byte span in the segment; assigned by the decoder
    pub span: ByteSpan,
    /// Mutation sequence within the segment; assigned by the decoder
    pub sequence: u64,
}

impl RawMutation {
    pub fn new(table: TableId, timestamp_micros: i64) -> Self {
        Self {
            table,
            timestamp_micros,
            row_marker: false,
            row_deletion_ts: None,
            key_values: Vec::new(),
            cells: Vec::new(),
            span: ByteSpan::default(),
            sequence: 0,
        }
    }

    /// Mark as a full-row write.
    pub fn with_row_marker(mut self) -> Self {
        self.row_marker = true;
        self
    }

    /// Attach a row-level deletion timestamp.
    pub fn with_row_deletion(mut self, deletion_ts: i64) -> Self {
        self.row_deletion_ts = Some(deletion_ts);
        self
    }

    /// Append a primary-key value (table-defined order).
    pub fn with_key(mut self, value: impl Into<Bytes>) -> Self {
        self.key_values.push(value.into());
        self
    }

    /// Append a column delta.
    pub fn with_cell(mut self, cell: RawCell) -> Self {
        self.cells.push(cell);
        self
    }

    /// Whether any cell carries a live value.
    pub fn has_live_cells(&self) -> bool {
        self.cells.iter().any(|c| c.value.is_some())
    }

    /// Cursor position immediately after this mutation.
    pub fn cursor_after(&self) -> Cursor {
        Cursor::new(self.span.start + self.span.len, self.sequence + 1)
    }

    /// Encode the payload (no frame).
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_short_string(&mut buf, &self.table.keyspace, "keyspace")?;
        put_short_string(&mut buf, &self.table.table, "table")?;
        buf.put_i64(self.timestamp_micros);

        let mut flags = 0u8;
        if self.row_deletion_ts.is_some() {
            flags |= FLAG_ROW_DELETION;
        }
        if self.row_marker {
            flags |= FLAG_ROW_MARKER;
        }
        buf.put_u8(flags);
        if let Some(ts) = self.row_deletion_ts {
            buf.put_i64(ts);
        }

        let key_count: u8 = checked_len(self.key_values.len(), u8::MAX as usize, "key count")?;
        buf.put_u8(key_count);
        for key in &self.key_values {
            let len: u16 = checked_len(key.len(), u16::MAX as usize, "key value")?;
            buf.put_u16(len);
            buf.put_slice(key);
        }

        let cell_count: u16 = checked_len(self.cells.len(), u16::MAX as usize, "cell count")?;
        buf.put_u16(cell_count);
        for cell in &self.cells {
            put_short_string(&mut buf, &cell.name, "cell name")?;
            let mut cell_flags = 0u8;
            if cell.value.is_some() {
                cell_flags |= CELL_FLAG_VALUE;
            }
            if cell.deletion_ts.is_some() {
                cell_flags |= CELL_FLAG_TOMBSTONE;
            }
            if cell_flags == 0 || cell_flags == (CELL_FLAG_VALUE | CELL_FLAG_TOMBSTONE) {
                return Err(CdcError::codec(format!(
                    "cell {} must be exactly one of live or tombstoned",
                    cell.name
                )));
            }
            buf.put_u8(cell_flags);
            if let Some(ts) = cell.deletion_ts {
                buf.put_i64(ts);
            }
            if let Some(value) = &cell.value {
                let len: u32 = checked_len(value.len(), u32::MAX as usize, "cell value")?;
                buf.put_u32(len);
                buf.put_slice(value);
            }
        }

        Ok(buf.freeze())
    }

    /// Encode and append the full record frame `[len][payload][crc]`.
    pub fn write_frame(&self, buf: &mut BytesMut) -> Result<()> {
        let payload = self.encode()?;
        if payload.len() as u64 > MAX_MUTATION_SIZE as u64 {
            return Err(CdcError::codec("mutation payload exceeds maximum size"));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        buf.put_u32(hasher.finalize());
        Ok(())
    }

    /// Decode a payload. Span and sequence are assigned by the caller.
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let keyspace = get_short_string(&mut payload, "keyspace")?;
        let table = get_short_string(&mut payload, "table")?;
        let timestamp_micros = get_i64(&mut payload, "timestamp")?;

        let flags = get_u8(&mut payload, "flags")?;
        if flags & !(FLAG_ROW_DELETION | FLAG_ROW_MARKER) != 0 {
            return Err(CdcError::codec(format!("unknown mutation flags {flags:#04x}")));
        }
        let row_deletion_ts = if flags & FLAG_ROW_DELETION != 0 {
            Some(get_i64(&mut payload, "row deletion timestamp")?)
        } else {
            None
        };
        let row_marker = flags & FLAG_ROW_MARKER != 0;

        let key_count = get_u8(&mut payload, "key count")? as usize;
        let mut key_values = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let len = get_u16(&mut payload, "key length")? as usize;
            key_values.push(get_bytes(&mut payload, len, "key value")?);
        }

        let cell_count = get_u16(&mut payload, "cell count")? as usize;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let name = get_short_string(&mut payload, "cell name")?;
            let cell_flags = get_u8(&mut payload, "cell flags")?;
            if cell_flags & !(CELL_FLAG_VALUE | CELL_FLAG_TOMBSTONE) != 0 {
                return Err(CdcError::codec(format!(
                    "unknown cell flags {cell_flags:#04x} on {name}"
                )));
            }
            if cell_flags == 0 || cell_flags == (CELL_FLAG_VALUE | CELL_FLAG_TOMBSTONE) {
                return Err(CdcError::codec(format!(
                    "cell {name} must be exactly one of live or tombstoned"
                )));
            }
            let deletion_ts = if cell_flags & CELL_FLAG_TOMBSTONE != 0 {
                Some(get_i64(&mut payload, "cell deletion timestamp")?)
            } else {
                None
            };
            let value = if cell_flags & CELL_FLAG_VALUE != 0 {
                let len = get_u32(&mut payload, "cell value length")? as usize;
                Some(get_bytes(&mut payload, len, "cell value")?)
            } else {
                None
            };
            cells.push(RawCell {
                name,
                value,
                deletion_ts,
            });
        }

        if payload.has_remaining() {
            return Err(CdcError::codec(format!(
                "{} trailing bytes after mutation payload",
                payload.remaining()
            )));
        }

        Ok(Self {
            table: TableId::new(keyspace, table),
            timestamp_micros,
            row_marker,
            row_deletion_ts,
            key_values,
            cells,
            span: ByteSpan::default(),
            sequence: 0,
        })
    }
}

fn checked_len<T: TryFrom<usize>>(len: usize, max: usize, what: &str) -> Result<T> {
    if len > max {
        return Err(CdcError::codec(format!("{what} too large to encode: {len}")));
    }
    T::try_from(len).map_err(|_| CdcError::codec(format!("{what} too large to encode: {len}")))
}

fn put_short_string(buf: &mut BytesMut, s: &str, what: &str) -> Result<()> {
    let len: u8 = checked_len(s.len(), u8::MAX as usize, what)?;
    buf.put_u8(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn need(buf: &Bytes, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        Err(CdcError::codec(format!("payload truncated reading {what}")))
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut Bytes, what: &str) -> Result<u8> {
    need(buf, 1, what)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes, what: &str) -> Result<u16> {
    need(buf, 2, what)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes, what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32())
}

fn get_i64(buf: &mut Bytes, what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

fn get_bytes(buf: &mut Bytes, len: usize, what: &str) -> Result<Bytes> {
    need(buf, len, what)?;
    Ok(buf.copy_to_bytes(len))
}

fn get_short_string(buf: &mut Bytes, what: &str) -> Result<String> {
    let len = get_u8(buf, what)? as usize;
    let raw = get_bytes(buf, len, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| CdcError::codec(format!("invalid utf-8 in {what}")))
}

/// Pull-based decoder over one segment file.
///
/// Owns the file handle and the read cursor. Bytes are consumed strictly in
/// order; the cursor only advances past a record once the record fully
/// verified and parsed.
#[derive(Debug)]
pub struct SegmentDecoder {
    segment: SegmentId,
    path: PathBuf,
    reader: BufReader<File>,
    cursor: Cursor,
    header_verified: bool,
}

impl SegmentDecoder {
    /// Open a segment for decoding from the start.
    pub fn open(segment: SegmentId, path: &Path) -> Result<Self> {
        Self::open_at(segment, path, Cursor::default())
    }

    /// Open a segment resuming at `cursor` (as persisted by the offset
    /// store). A nonzero offset implies the header was verified by the run
    /// that persisted the cursor.
    pub fn open_at(segment: SegmentId, path: &Path, cursor: Cursor) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(cursor.offset))?;
        Ok(Self {
            segment,
            path: path.to_path_buf(),
            reader,
            cursor,
            header_verified: cursor.offset >= SEGMENT_HEADER_SIZE,
        })
    }

    /// Current read cursor.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode mutations up to (never past) the confirmed-safe `limit`.
    ///
    /// The returned iterator ends when the next frame would cross the limit;
    /// that is not an error, just no more confirmed data. Corruption inside
    /// the limit yields one `Err` and fuses the iterator.
    pub fn decode_up_to(&mut self, limit: u64) -> MutationIter<'_> {
        MutationIter {
            decoder: self,
            limit,
            failed: false,
        }
    }

    fn corrupt(&self, offset: u64, reason: impl Into<String>) -> CdcError {
        CdcError::corrupt(self.segment.log_file_name(), offset, reason)
    }

    fn read_exact(&mut self, buf: &mut [u8], offset: u64, what: &str) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                self.corrupt(
                    offset,
                    format!("file shorter than confirmed safe offset reading {what}"),
                )
            } else {
                self.corrupt(offset, format!("read failed for {what}: {e}"))
            }
        })
    }

    fn verify_header(&mut self) -> Result<()> {
        let mut raw = [0u8; SEGMENT_HEADER_SIZE as usize];
        self.read_exact(&mut raw, 0, "segment header")?;
        let header = SegmentHeader::decode(&raw).map_err(|e| self.corrupt(0, e.to_string()))?;
        if header.index != self.segment.index || header.generation != self.segment.generation {
            return Err(self.corrupt(
                0,
                format!(
                    "header identity commitlog-{}-{} does not match file name",
                    header.index, header.generation
                ),
            ));
        }
        self.header_verified = true;
        self.cursor.offset = SEGMENT_HEADER_SIZE;
        Ok(())
    }

    fn next_mutation(&mut self, limit: u64) -> Option<Result<RawMutation>> {
        if !self.header_verified {
            if limit < SEGMENT_HEADER_SIZE {
                // Not enough confirmed bytes for the header yet.
                return None;
            }
            if let Err(e) = self.verify_header() {
                return Some(Err(e));
            }
        }

        let start = self.cursor.offset;
        if start + RECORD_FRAME_OVERHEAD > limit {
            return None;
        }

        let mut len_buf = [0u8; 4];
        if let Err(e) = self.read_exact(&mut len_buf, start, "record length") {
            return Some(Err(e));
        }
        let len = u32::from_be_bytes(len_buf);

        if len == 0 {
            return Some(Err(self.corrupt(start, "zero-length record")));
        }
        if len > MAX_MUTATION_SIZE {
            return Some(Err(
                self.corrupt(start, format!("oversized record of {len} bytes"))
            ));
        }

        let frame_len = RECORD_FRAME_OVERHEAD + len as u64;
        if start + frame_len > limit {
            // Frame extends past the confirmed region: the record is still in
            // flight. Park the cursor at the frame start for the next poll.
            if let Err(e) = self.reader.seek_relative(-4) {
                return Some(Err(self.corrupt(start, format!("seek failed: {e}"))));
            }
            return None;
        }

        let mut payload = vec![0u8; len as usize];
        if let Err(e) = self.read_exact(&mut payload, start, "record payload") {
            return Some(Err(e));
        }
        let mut crc_buf = [0u8; 4];
        if let Err(e) = self.read_exact(&mut crc_buf, start, "record crc") {
            return Some(Err(e));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != u32::from_be_bytes(crc_buf) {
            return Some(Err(self.corrupt(start, "record crc mismatch")));
        }

        let mut mutation = match RawMutation::decode(Bytes::from(payload)) {
            Ok(m) => m,
            Err(e) => return Some(Err(self.corrupt(start, e.to_string()))),
        };
        mutation.span = ByteSpan {
            start,
            len: frame_len,
        };
        mutation.sequence = self.cursor.sequence;

        self.cursor.offset = start + frame_len;
        self.cursor.sequence += 1;
        Some(Ok(mutation))
    }
}

/// Lazy mutation sequence from [`SegmentDecoder::decode_up_to`]. Fuses after
/// the first error.
pub struct MutationIter<'a> {
    decoder: &'a mut SegmentDecoder,
    limit: u64,
    failed: bool,
}

impl Iterator for MutationIter<'_> {
    type Item = Result<RawMutation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.decoder.next_mutation(self.limit);
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> SegmentId {
        SegmentId::new(5, 1_700_000_000_000)
    }

    fn sample_mutation(key: i32, ts: i64) -> RawMutation {
        RawMutation::new(TableId::new("ks1", "tbl1"), ts)
            .with_row_marker()
            .with_key(Bytes::copy_from_slice(&key.to_be_bytes()))
            .with_cell(RawCell::live("b", Bytes::copy_from_slice(&(key * 2).to_be_bytes())))
    }

    /// Write a segment file and return the byte offsets after each record.
    fn write_segment(path: &Path, id: SegmentId, mutations: &[RawMutation]) -> Vec<u64> {
        let mut buf = BytesMut::new();
        buf.put_slice(&SegmentHeader::new(id).encode());
        let mut offsets = Vec::new();
        for m in mutations {
            m.write_frame(&mut buf).unwrap();
            offsets.push(buf.len() as u64);
        }
        std::fs::write(path, &buf).unwrap();
        offsets
    }

    #[test]
    fn test_header_round_trip() {
        let header = SegmentHeader::new(seg());
        let encoded = header.encode();
        assert_eq!(encoded.len() as u64, SEGMENT_HEADER_SIZE);
        assert_eq!(SegmentHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_corruption() {
        let mut raw = SegmentHeader::new(seg()).encode().to_vec();
        raw[0] ^= 0xFF;
        assert!(SegmentHeader::decode(&raw).is_err());

        let mut raw = SegmentHeader::new(seg()).encode().to_vec();
        raw[10] ^= 0x01;
        let err = SegmentHeader::decode(&raw).unwrap_err();
        assert!(err.to_string().contains("crc"));
    }

    #[test]
    fn test_payload_round_trip() {
        let mutation = RawMutation::new(TableId::new("ks1", "tbl1"), 77)
            .with_row_deletion(99)
            .with_key(Bytes::from_static(&[0, 0, 0, 1]))
            .with_key(Bytes::from_static(b"ck"))
            .with_cell(RawCell::live("c", Bytes::from_static(b"hello")))
            .with_cell(RawCell::tombstone("d", 123));

        let decoded = RawMutation::decode(mutation.encode().unwrap()).unwrap();
        assert_eq!(decoded.table, mutation.table);
        assert_eq!(decoded.timestamp_micros, 77);
        assert!(!decoded.row_marker);
        assert_eq!(decoded.row_deletion_ts, Some(99));
        assert_eq!(decoded.key_values, mutation.key_values);
        assert_eq!(decoded.cells, mutation.cells);
    }

    #[test]
    fn test_payload_rejects_trailing_bytes() {
        let mutation = sample_mutation(1, 10);
        let mut raw = mutation.encode().unwrap().to_vec();
        raw.push(0xAB);
        let err = RawMutation::decode(Bytes::from(raw)).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_encode_rejects_invalid_cell() {
        let bad = RawMutation::new(TableId::new("ks1", "tbl1"), 0).with_cell(RawCell {
            name: "c".into(),
            value: None,
            deletion_ts: None,
        });
        assert!(bad.encode().is_err());
    }

    #[test]
    fn test_decode_all_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mutations: Vec<RawMutation> =
            (0..3).map(|i| sample_mutation(i, i as i64 * 100)).collect();
        let offsets = write_segment(&path, seg(), &mutations);
        let end = offsets[2];

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let decoded: Vec<RawMutation> = decoder
            .decode_up_to(end)
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(decoded.len(), 3);
        for (i, m) in decoded.iter().enumerate() {
            assert_eq!(m.sequence, i as u64);
        }
        // Spans tile the file exactly.
        assert_eq!(decoded[0].span.start, SEGMENT_HEADER_SIZE);
        assert_eq!(decoded[0].cursor_after().offset, offsets[0]);
        assert_eq!(decoded[2].cursor_after().offset, end);
        assert_eq!(decoder.cursor(), Cursor::new(end, 3));
    }

    #[test]
    fn test_limit_stops_mid_record_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mutations: Vec<RawMutation> =
            (0..3).map(|i| sample_mutation(i, i as i64 * 100)).collect();
        let offsets = write_segment(&path, seg(), &mutations);

        // Limit cuts the second record in half.
        let limit = offsets[0] + 3;
        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let first: Vec<RawMutation> = decoder
            .decode_up_to(limit)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.cursor(), Cursor::new(offsets[0], 1));

        // Raising the limit resumes exactly where we stopped.
        let rest: Vec<RawMutation> = decoder
            .decode_up_to(offsets[2])
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].sequence, 1);
        assert_eq!(decoder.cursor(), Cursor::new(offsets[2], 3));
    }

    #[test]
    fn test_resume_from_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mutations: Vec<RawMutation> =
            (0..3).map(|i| sample_mutation(i, i as i64 * 100)).collect();
        let offsets = write_segment(&path, seg(), &mutations);

        let resume = Cursor::new(offsets[0], 1);
        let mut decoder = SegmentDecoder::open_at(seg(), &path, resume).unwrap();
        let decoded: Vec<RawMutation> = decoder
            .decode_up_to(offsets[2])
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].sequence, 1);
        assert_eq!(decoded[1].sequence, 2);
    }

    #[test]
    fn test_crc_mismatch_is_corrupt_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mutations: Vec<RawMutation> =
            (0..2).map(|i| sample_mutation(i, i as i64)).collect();
        let offsets = write_segment(&path, seg(), &mutations);

        // Flip one payload byte inside the second record.
        let mut raw = std::fs::read(&path).unwrap();
        let target = offsets[0] as usize + 6;
        raw[target] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let results: Vec<Result<RawMutation>> = decoder.decode_up_to(offsets[1]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match results[1].as_ref().unwrap_err() {
            CdcError::CorruptSegment { offset, .. } => assert_eq!(*offset, offsets[0]),
            other => panic!("expected corrupt segment, got {other}"),
        }
    }

    #[test]
    fn test_truncated_file_below_limit_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mutations: Vec<RawMutation> =
            (0..2).map(|i| sample_mutation(i, i as i64)).collect();
        let offsets = write_segment(&path, seg(), &mutations);

        // Chop the file mid-payload; the limit still covers both records.
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..offsets[0] as usize + 9]).unwrap();

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let results: Vec<Result<RawMutation>> = decoder.decode_up_to(offsets[1]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match results[1].as_ref().unwrap_err() {
            CdcError::CorruptSegment { offset, reason, .. } => {
                assert_eq!(*offset, offsets[0]);
                assert!(reason.contains("shorter than confirmed safe offset"));
            }
            other => panic!("expected corrupt segment, got {other}"),
        }
    }

    #[test]
    fn test_zero_length_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mut buf = BytesMut::new();
        buf.put_slice(&SegmentHeader::new(seg()).encode());
        buf.put_u32(0);
        buf.put_u32(0);
        std::fs::write(&path, &buf).unwrap();

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let results: Vec<Result<RawMutation>> = decoder.decode_up_to(buf.len() as u64).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_header_identity_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let other = SegmentId::new(99, 1);
        write_segment(&path, other, &[sample_mutation(1, 1)]);

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let results: Vec<Result<RawMutation>> = decoder.decode_up_to(1024).collect();
        assert!(matches!(
            results[0],
            Err(CdcError::CorruptSegment { offset: 0, .. })
        ));
    }

    #[test]
    fn test_limit_below_header_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        write_segment(&path, seg(), &[sample_mutation(1, 1)]);

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        assert!(decoder.decode_up_to(10).next().is_none());
        assert_eq!(decoder.cursor(), Cursor::default());
    }

    #[test]
    fn test_iterator_fuses_after_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(seg().log_file_name());
        let mut buf = BytesMut::new();
        buf.put_slice(&SegmentHeader::new(seg()).encode());
        buf.put_u32(0);
        buf.put_u32(0);
        sample_mutation(1, 1).write_frame(&mut buf).unwrap();
        std::fs::write(&path, &buf).unwrap();

        let mut decoder = SegmentDecoder::open(seg(), &path).unwrap();
        let mut iter = decoder.decode_up_to(buf.len() as u64);
        assert!(matches!(iter.next(), Some(Err(_))));
        assert!(iter.next().is_none());
    }
}
