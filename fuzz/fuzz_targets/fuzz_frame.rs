#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;
use torpedo_msg::{Codec, FrameCodec};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the frame decoder, then decode every body
    let mut buf = BytesMut::from(data);
    let codec = Codec::default();
    while let Ok(Some(body)) = FrameCodec.decode(&mut buf) {
        let _ = codec.decode(&body);
    }
    let _ = FrameCodec.decode_eof(&mut buf);
});
