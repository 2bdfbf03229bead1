//! Example: Choosing a Serialization Format
//!
//! Encodes the same messages with MessagePack (the default) and JSON, shows
//! the resulting frames and checks that each one decodes back unchanged.
//!
//! Run with: `cargo run --example serialization_formats`

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use serde_json::json;
use torpedo_msg::core::codec::{read_frame_body, HEADER_SIZE};
use torpedo_msg::{pack_frame, Codec, SerializationFormat};

/// Any `Serialize` type can be sent; peers always receive a `Message` tree.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Updates {
    cmd: String,
    data: Vec<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Serialization Formats Demo ===\n");

    let snapshot = json!({"cmd": "snapshot", "data": (0..16).collect::<Vec<u32>>()});
    let updates = Updates {
        cmd: "updates".to_string(),
        data: vec![7, 8, 9],
    };

    let mut sizes = Vec::new();
    for format in [SerializationFormat::MessagePack, SerializationFormat::Json] {
        let codec = Codec::new(format);
        println!("{}", format.name().to_uppercase());

        let frame = pack_frame(&codec, &snapshot)?;
        println!("   - Frame size: {} bytes ({} header)", frame.len(), HEADER_SIZE);
        println!("   - Header: {:02X?}", &frame[..HEADER_SIZE]);
        println!(
            "   - Body: {:02X?}",
            &frame[HEADER_SIZE..frame.len().min(HEADER_SIZE + 20)]
        );

        let mut reader = &frame[..];
        let body = read_frame_body(&mut reader).await?;
        let recovered = codec.decode(&body)?;
        println!(
            "   - Roundtrip: {}",
            if recovered == snapshot { "✓ Success" } else { "✗ Failed" }
        );

        let typed_body = codec.encode(&updates)?;
        let typed: Updates = codec.decode_as(&typed_body)?;
        println!(
            "   - Typed roundtrip: {}",
            if typed == updates { "✓ Success" } else { "✗ Failed" }
        );
        println!();

        sizes.push((format, frame.len()));
    }

    println!("SIZE COMPARISON");
    let baseline = sizes[0].1 as f64;
    for (format, size) in &sizes {
        println!(
            "   - {:12} {} bytes ({:+.1}%)",
            format.name(),
            size,
            (*size as f64 / baseline - 1.0) * 100.0
        );
    }
    println!();

    println!("REJECTED VALUES");
    let mut bad = std::collections::HashMap::new();
    bad.insert((1, 2), "tuple keys have no message form");
    match Codec::default().encode(&bad) {
        Ok(_) => println!("   - unexpectedly encoded"),
        Err(e) => println!("   - {}", e),
    }

    Ok(())
}
