use image::{Rgba, RgbaImage};

use crate::error::FigureError;
use crate::geometry::PlacementRect;
use crate::raster::encode_rgba_png;
use crate::source::{PageSource, RawImageObject};

pub fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> PlacementRect {
    PlacementRect::new(x0, y0, x1, y1).expect("valid rect")
}

/// A PNG of deterministic noise; it barely compresses, so its size tracks its dimensions.
pub fn noise_png(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let image = RgbaImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    encode_rgba_png(&image).expect("encodes")
}

/// Wraps a source and fails image listing on one page.
pub struct FailingPage<S> {
    pub inner: S,
    pub page: u32,
}

impl<S: PageSource> PageSource for FailingPage<S> {
    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn page_size(&self, page: u32) -> Result<PlacementRect, FigureError> {
        self.inner.page_size(page)
    }

    fn page_text(&self, page: u32) -> Result<String, FigureError> {
        self.inner.page_text(page)
    }

    fn page_images(&self, page: u32) -> Result<Vec<RawImageObject>, FigureError> {
        if page == self.page {
            return Err(FigureError::Io(std::io::Error::other("corrupt page stream")));
        }
        self.inner.page_images(page)
    }
}
