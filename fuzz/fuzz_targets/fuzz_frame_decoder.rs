//! Fuzz target: `FrameDecoder::feed`
//!
//! Streams arbitrary bytes through the decoder and checks every yielded
//! frame is a well-formed descriptor plus exactly the payload it declares.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use nwp_host::bus::frame::{DESCRIPTOR_SIZE, MAX_PAYLOAD_SIZE, split_frame};
use nwp_host::bus::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let mut rest = data;

    while !rest.is_empty() {
        let (used, frame) = decoder.feed(rest);
        if let Some(frame) = frame {
            assert!(frame.len() >= DESCRIPTOR_SIZE);
            assert!(frame.len() <= DESCRIPTOR_SIZE + MAX_PAYLOAD_SIZE);
            let (header, payload) = split_frame(frame).expect("decoder yielded a malformed frame");
            assert_eq!(payload.len(), header.payload_len as usize);
        }
        assert!(used > 0 && used <= rest.len());
        rest = &rest[used..];
    }

    decoder.reset();
    let _ = decoder.feed(data);
});
