//! Test fixtures: encoded images and notification bodies.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::json;
use std::io::Cursor;

/// A solid-color PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([20, 120, 220, 255]),
    ));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

/// An S3 event notification body with one `ObjectCreated:Put` record per key.
/// Keys are encoded the way S3 encodes them.
pub fn s3_event(keys: &[&str]) -> String {
    let records: Vec<_> = keys
        .iter()
        .map(|key| {
            json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "marketcast-landing" },
                    "object": { "key": urlencoding::encode(key).replace("%2F", "/") }
                }
            })
        })
        .collect();
    json!({ "Records": records }).to_string()
}
