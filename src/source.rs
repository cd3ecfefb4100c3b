use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::FigureError;
use crate::geometry::PlacementRect;

/// Encoding of an image payload as it came out of the document or the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Jpx,
    Jbig2,
    Fax,
    Flate,
    Raw,
}

impl ImageFormat {
    /// File extension used by the image store.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Jpx => "jpx",
            Self::Jbig2 => "jbig2",
            Self::Fax => "fax",
            Self::Flate => "flate",
            Self::Raw => "raw",
        }
    }

    /// Whether the `image` crate can decode payloads of this format.
    pub fn is_decodable(self) -> bool {
        matches!(self, Self::Png | Self::Jpeg)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One embedded image object as drawn on one page.
///
/// An XObject painted several times yields one `RawImageObject` per placement.
#[derive(Debug, Clone)]
pub struct RawImageObject {
    /// 1-based page number.
    pub page: u32,
    pub rect: PlacementRect,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl RawImageObject {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Everything the engine needs from a document renderer. Pages are 1-based.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Page bounds in page space; `x0`/`y0` are always zero.
    fn page_size(&self, page: u32) -> Result<PlacementRect, FigureError>;

    fn page_text(&self, page: u32) -> Result<String, FigureError>;

    fn page_images(&self, page: u32) -> Result<Vec<RawImageObject>, FigureError>;

    /// Full-page raster at `zoom` pixels per page unit, for sources that can draw vector
    /// content. Sources without a renderer return `Ok(None)` and regions are then
    /// composited from their member images.
    fn render_page(&self, _page: u32, _zoom: f32) -> Result<Option<RgbaImage>, FigureError> {
        Ok(None)
    }

    /// Check that `page` exists.
    fn check_page(&self, page: u32) -> Result<(), FigureError> {
        let count = self.page_count();
        if page == 0 || page as usize > count {
            return Err(FigureError::PageOutOfRange { page, count });
        }
        Ok(())
    }
}
