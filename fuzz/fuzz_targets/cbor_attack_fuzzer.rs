//! Fuzz target for hostile CBOR on the inbound channel
//!
//! # Strategy
//!
//! - Deeply nested: arrays/maps nested to arbitrary depth (stack overflow)
//! - Huge lengths: CBOR claiming massive byte/string/array lengths (memory)
//! - Oversized: payloads just past the size limit
//! - Duplicate keys: maps repeating the event tag
//! - Random bytes: completely arbitrary data
//!
//! # Invariants
//!
//! - Decoding completes quickly and NEVER panics
//! - Huge claimed lengths are rejected, not allocated
//! - Payloads over the size limit are always rejected

#![no_main]

use arbitrary::Arbitrary;
use chatsync_proto::{ServerEvent, payloads::MAX_PAYLOAD_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u8, payload_type: PayloadType },
    HugeLength { claimed_len_exponent: u8 },
    Oversized { extra: u16, fill: u8 },
    DuplicateKeys { count: u8 },
    RandomBytes { bytes: Vec<u8> },
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadType {
    Array,
    Map,
    Bytes,
    String,
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth, payload_type } => {
            let bytes = create_nested_cbor(usize::from(depth % 50), &payload_type);
            let _ = ServerEvent::decode(&bytes);
        }

        CborAttack::HugeLength { claimed_len_exponent } => {
            let exponent = u32::from(claimed_len_exponent % 21);
            let claimed_length = if exponent < 20 { 1u32 << exponent } else { u32::MAX };

            for bytes in [
                create_huge_byte_string(claimed_length),
                create_huge_text_string(claimed_length),
                create_huge_array(claimed_length),
            ] {
                let _ = ServerEvent::decode(&bytes);
            }
        }

        CborAttack::Oversized { extra, fill } => {
            let bytes = vec![fill; MAX_PAYLOAD_SIZE + 1 + usize::from(extra)];
            assert!(ServerEvent::decode(&bytes).is_err(), "oversized payload accepted");
        }

        CborAttack::DuplicateKeys { count } => {
            let count = (count % 10).max(2);
            let mut bytes = vec![0xA0 | count];
            for _ in 0..count {
                bytes.push(0x64);
                bytes.extend_from_slice(b"type");
                bytes.push(0x6A);
                bytes.extend_from_slice(b"disconnect");
            }
            let _ = ServerEvent::decode(&bytes);
        }

        CborAttack::RandomBytes { bytes } => {
            let _ = ServerEvent::decode(&bytes);
        }
    }
});

fn create_nested_cbor(depth: usize, payload_type: &PayloadType) -> Vec<u8> {
    let mut bytes = Vec::new();

    match payload_type {
        PayloadType::Array => {
            bytes.extend(std::iter::repeat_n(0x81, depth));
            bytes.push(0x01);
        }
        PayloadType::Map => {
            for _ in 0..depth {
                bytes.extend_from_slice(&[0xA1, 0x64]);
                bytes.extend_from_slice(b"type");
            }
            bytes.push(0x01);
        }
        PayloadType::Bytes => {
            bytes.extend(std::iter::repeat_n(0x81, depth));
            bytes.extend_from_slice(&[0x41, 0x00]);
        }
        PayloadType::String => {
            bytes.extend(std::iter::repeat_n(0x81, depth));
            bytes.extend_from_slice(&[0x61, b'x']);
        }
    }

    bytes
}

fn create_huge_byte_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x5A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![0xAA; (claimed_length as usize).min(10)]);
    bytes
}

fn create_huge_text_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x7A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![b'x'; (claimed_length as usize).min(10)]);
    bytes
}

fn create_huge_array(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x9A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(std::iter::repeat_n(0x01, (claimed_length as usize).min(5)));
    bytes
}
