//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences through the length-prefix decoder in
//! chunks and checks that every yielded payload fits the frame limit, that
//! consumption never overruns the input, and that the decoder still
//! accepts input after a reset.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use eswcom::com::codec::{FrameDecoder, MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    let mut rest = data;
    while !rest.is_empty() {
        let (used, frame) = decoder.feed(rest);
        assert!(used <= rest.len(), "consumed past the input");
        if let Some(payload) = frame {
            assert!(!payload.is_empty(), "empty payload yielded");
            assert!(payload.len() <= MAX_FRAME_SIZE, "payload exceeds MAX_FRAME_SIZE");
        } else {
            assert_eq!(used, rest.len(), "partial consumption without a frame");
        }
        rest = &rest[used..];
    }

    decoder.reset();
    let _ = decoder.feed(data);
});
