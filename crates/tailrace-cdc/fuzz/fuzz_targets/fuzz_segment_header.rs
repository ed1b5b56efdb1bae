#![no_main]
//! Fuzz test for the segment header codec
//!
//! Header decoding guards the first bytes of every segment file: arbitrary
//! input must either yield a checksum-valid header or a structured error,
//! never a panic. A decoded header re-encodes to the exact input bytes.

use libfuzzer_sys::fuzz_target;
use tailrace_cdc::commitlog::{SegmentHeader, SEGMENT_HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = SegmentHeader::decode(data) {
        assert_eq!(&header.encode()[..], &data[..SEGMENT_HEADER_SIZE as usize]);
    }
});
