use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use png::{BitDepth, ColorType, Encoder};
use tracing::debug;

use crate::error::FigureError;
use crate::geometry::PlacementRect;
use crate::merge::MergedRegion;

/// Renders a region at a fixed magnification with a fixed margin.
///
/// With a page snapshot the region is cropped out of it, so vector drawing inside the region
/// is kept. Without one, the region's member images are decoded and composited onto a white
/// canvas at their placement rectangles. Either way the result is one flattened PNG no matter
/// how many objects the region was built from.
#[derive(Debug, Clone, Copy)]
pub struct RegionRasterizer {
    zoom: f32,
    margin: f32,
}

impl RegionRasterizer {
    pub fn new(zoom: f32, margin: f32) -> Self {
        Self { zoom, margin }
    }

    /// The page-space rectangle actually rendered for `bounds`.
    pub fn clip_rect(&self, bounds: &PlacementRect, page: &PlacementRect) -> Option<PlacementRect> {
        bounds.expand(self.margin).clip_to(page)
    }

    pub fn rasterize(
        &self,
        region: &MergedRegion,
        page: &PlacementRect,
        snapshot: Option<&RgbaImage>,
    ) -> Result<Vec<u8>, FigureError> {
        let page_number = region.members.first().map_or(0, |m| m.page);
        let clip = self
            .clip_rect(&region.bounds, page)
            .ok_or(FigureError::EmptyRegion(page_number))?;

        let canvas = match snapshot {
            Some(snapshot) => self.crop_snapshot(snapshot, &clip, page_number)?,
            None => self.composite(region, &clip, page_number)?,
        };
        encode_rgba_png(&canvas)
    }

    fn pixels(&self, length: f32) -> u32 {
        (length * self.zoom).round().max(1.0) as u32
    }

    fn crop_snapshot(
        &self,
        snapshot: &RgbaImage,
        clip: &PlacementRect,
        page_number: u32,
    ) -> Result<RgbaImage, FigureError> {
        let x = ((clip.x0 * self.zoom).floor().max(0.0) as u32).min(snapshot.width());
        let y = ((clip.y0 * self.zoom).floor().max(0.0) as u32).min(snapshot.height());
        let width = self.pixels(clip.width()).min(snapshot.width() - x);
        let height = self.pixels(clip.height()).min(snapshot.height() - y);
        if width == 0 || height == 0 {
            return Err(FigureError::EmptyRegion(page_number));
        }
        Ok(imageops::crop_imm(snapshot, x, y, width, height).to_image())
    }

    fn composite(
        &self,
        region: &MergedRegion,
        clip: &PlacementRect,
        page_number: u32,
    ) -> Result<RgbaImage, FigureError> {
        let mut canvas = RgbaImage::from_pixel(
            self.pixels(clip.width()),
            self.pixels(clip.height()),
            Rgba([255, 255, 255, 255]),
        );

        let mut drawn = 0usize;
        for member in &region.members {
            if !member.format.is_decodable() {
                debug!(page = member.page, format = %member.format, "cannot composite member");
                continue;
            }
            let decoded = match image::load_from_memory(&member.bytes) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(page = member.page, "undecodable member image: {err}");
                    continue;
                }
            };
            let target_w = self.pixels(member.rect.width());
            let target_h = self.pixels(member.rect.height());
            let scaled = imageops::resize(&decoded.to_rgba8(), target_w, target_h, FilterType::Triangle);
            let x = ((member.rect.x0 - clip.x0) * self.zoom).round() as i64;
            let y = ((member.rect.y0 - clip.y0) * self.zoom).round() as i64;
            imageops::overlay(&mut canvas, &scaled, x, y);
            drawn += 1;
        }

        if drawn == 0 {
            return Err(FigureError::EmptyRegion(page_number));
        }
        Ok(canvas)
    }
}

/// Encode 8-bit samples as PNG.
pub(crate) fn encode_png(
    data: &[u8],
    width: u32,
    height: u32,
    color: ColorType,
) -> Result<Vec<u8>, FigureError> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, width, height);
    encoder.set_color(color);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    writer.finish()?;
    Ok(buffer)
}

pub(crate) fn encode_rgba_png(canvas: &RgbaImage) -> Result<Vec<u8>, FigureError> {
    encode_png(canvas.as_raw(), canvas.width(), canvas.height(), ColorType::Rgba)
}
