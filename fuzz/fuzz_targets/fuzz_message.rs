#![no_main]

use libfuzzer_sys::fuzz_target;
use torpedo_msg::{Codec, SerializationFormat};

fuzz_target!(|data: &[u8]| {
    for format in [SerializationFormat::MessagePack, SerializationFormat::Json] {
        let codec = Codec::new(format);
        // Anything accepted must re-encode without panicking
        if let Ok(msg) = codec.decode(data) {
            let _ = codec.encode(&msg);
        }
    }
});
