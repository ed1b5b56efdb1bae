#![no_main]
//! Fuzz test for the mutation payload codec
//!
//! Arbitrary bytes must never panic the decoder: every input either decodes
//! into a mutation or returns a structured codec error. Anything that decodes
//! must re-encode and decode back to the same mutation.

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tailrace_cdc::commitlog::RawMutation;

fuzz_target!(|data: &[u8]| {
    let payload = Bytes::copy_from_slice(data);
    if let Ok(mutation) = RawMutation::decode(payload) {
        let encoded = mutation.encode().unwrap();
        let reparsed = RawMutation::decode(encoded).unwrap();
        assert_eq!(mutation, reparsed);
    }
});
