//! Fuzz target: `CompoundCodec::get_compound` / `get_parsed_compound`
//!
//! Untrusted request bytes must decode or fail with a typed error, never
//! panic. A frame that decodes must re-encode to the same bytes.
//!
//! cargo fuzz run fuzz_compound_decoder

#![no_main]

use eswcom::com::codec::CompoundCodec;
use eswcom::config::CompoundLimits;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = CompoundCodec::new(CompoundLimits::default());

    match codec.get_compound(data) {
        Ok(frame) => {
            assert_eq!(codec.encode(&frame).as_slice(), data);
            assert!(codec.get_parsed_compound(data).is_ok());
        }
        Err(_) => assert!(codec.get_parsed_compound(data).is_err()),
    }

    let _ = codec.decode_reply(data);
});
