#![allow(dead_code)]

use std::io::Cursor;

use figmap::{ImageFormat, PlacementRect, RawImageObject};
use image::{Rgba, RgbaImage};

pub fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> PlacementRect {
    PlacementRect::new(x0, y0, x1, y1).expect("valid rect")
}

/// Deterministic noise encoded as PNG; it barely compresses, so larger images are larger files.
pub fn noise_png(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let image = RgbaImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encodes");
    bytes
}

pub fn png_object(page: u32, rect: PlacementRect, bytes: Vec<u8>) -> RawImageObject {
    RawImageObject {
        page,
        rect,
        bytes,
        format: ImageFormat::Png,
    }
}
