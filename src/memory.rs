use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::error::FigureError;
use crate::geometry::PlacementRect;
use crate::source::{PageSource, RawImageObject};

#[derive(Debug, Clone)]
pub struct MemoryPage {
    pub size: PlacementRect,
    pub text: String,
    pub images: Vec<RawImageObject>,
    /// Page raster and the zoom it was taken at.
    pub snapshot: Option<(f32, RgbaImage)>,
}

impl MemoryPage {
    /// A blank US Letter page.
    pub fn letter() -> Self {
        Self {
            size: PlacementRect {
                x0: 0.0,
                y0: 0.0,
                x1: 612.0,
                y1: 792.0,
            },
            text: String::new(),
            images: Vec::new(),
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pages: Vec<MemoryPage>,
}

impl MemorySource {
    /// A document of `page_count` blank letter pages.
    pub fn new(page_count: usize) -> Self {
        Self {
            pages: vec![MemoryPage::letter(); page_count],
        }
    }

    fn page_mut(&mut self, page: u32) -> &mut MemoryPage {
        let index = page.max(1) as usize - 1;
        if self.pages.len() <= index {
            self.pages.resize(index + 1, MemoryPage::letter());
        }
        &mut self.pages[index]
    }

    /// Append text to a page, growing the document if needed.
    pub fn with_text(mut self, page: u32, text: &str) -> Self {
        let target = self.page_mut(page);
        if !target.text.is_empty() {
            target.text.push('\n');
        }
        target.text.push_str(text);
        self
    }

    /// Place an image on the page it names.
    pub fn with_image(mut self, image: RawImageObject) -> Self {
        self.page_mut(image.page).images.push(image);
        self
    }

    pub fn with_snapshot(mut self, page: u32, zoom: f32, snapshot: RgbaImage) -> Self {
        self.page_mut(page).snapshot = Some((zoom, snapshot));
        self
    }

    fn get(&self, page: u32) -> Result<&MemoryPage, FigureError> {
        self.check_page(page)?;
        Ok(&self.pages[page as usize - 1])
    }
}

impl PageSource for MemorySource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page: u32) -> Result<PlacementRect, FigureError> {
        Ok(self.get(page)?.size)
    }

    fn page_text(&self, page: u32) -> Result<String, FigureError> {
        Ok(self.get(page)?.text.clone())
    }

    fn page_images(&self, page: u32) -> Result<Vec<RawImageObject>, FigureError> {
        Ok(self.get(page)?.images.clone())
    }

    fn render_page(&self, page: u32, zoom: f32) -> Result<Option<RgbaImage>, FigureError> {
        let Some((taken_at, snapshot)) = &self.get(page)?.snapshot else {
            return Ok(None);
        };
        if (taken_at - zoom).abs() < f32::EPSILON {
            return Ok(Some(snapshot.clone()));
        }
        let scale = zoom / taken_at;
        let width = (snapshot.width() as f32 * scale).round().max(1.0) as u32;
        let height = (snapshot.height() as f32 * scale).round().max(1.0) as u32;
        Ok(Some(imageops::resize(snapshot, width, height, FilterType::Triangle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageFormat;

    #[test]
    fn builders_grow_the_document() {
        let source = MemorySource::new(1)
            .with_text(3, "See Figure 1.")
            .with_image(RawImageObject {
                page: 2,
                rect: PlacementRect::new(0.0, 0.0, 10.0, 10.0).unwrap(),
                bytes: vec![1, 2, 3],
                format: ImageFormat::Raw,
            });
        assert_eq!(source.page_count(), 3);
        assert_eq!(source.page_text(3).unwrap(), "See Figure 1.");
        assert_eq!(source.page_images(2).unwrap().len(), 1);
        assert!(source.page_images(1).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_pages_are_errors() {
        let source = MemorySource::new(2);
        assert!(matches!(
            source.page_text(0),
            Err(FigureError::PageOutOfRange { page: 0, count: 2 })
        ));
        assert!(source.page_images(3).is_err());
    }

    #[test]
    fn snapshots_rescale_to_the_requested_zoom() {
        let source = MemorySource::new(1).with_snapshot(1, 1.0, RgbaImage::new(612, 792));
        let rendered = source.render_page(1, 2.0).unwrap().expect("snapshot");
        assert_eq!(rendered.dimensions(), (1224, 1584));
        assert!(MemorySource::new(1).render_page(1, 2.0).unwrap().is_none());
    }
}
