//! Fuzz target for inbound and outbound payload decoding
//!
//! Feeds arbitrary bytes to both decoders.
//!
//! # Invariants
//!
//! - Decoding NEVER panics; invalid input returns an error
//! - A decoded server event always passes validation
//! - A decoded payload re-encodes to an equal value

#![no_main]

use chatsync_proto::{ClientRequest, ServerEvent};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = ServerEvent::decode(data) {
        assert!(event.validate().is_ok(), "decoded event failed validation: {event:?}");
        let bytes = event.encode().expect("decoded event must encode");
        assert_eq!(ServerEvent::decode(&bytes).ok(), Some(event));
    }

    if let Ok(request) = ClientRequest::decode(data) {
        let bytes = request.encode().expect("decoded request must encode");
        assert_eq!(ClientRequest::decode(&bytes).ok(), Some(request));
    }
});
