use image::RgbaImage;
use once_cell::unsync::OnceCell;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, ExtractionMode};
use crate::error::FigureError;
use crate::geometry::PlacementRect;
use crate::merge::{MergedRegion, merge_objects};
use crate::raster::RegionRasterizer;
use crate::source::{ImageFormat, PageSource, RawImageObject};

/// How a [`FigureImage`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Rasterized merged region (region-crop).
    RegionCrop,
    /// A lone fragment kept verbatim (fragment-merge).
    SingleImage,
    /// Rasterized group of fragments (fragment-merge).
    MergedRegion,
    /// An embedded image kept verbatim (raw-filtered).
    RawFiltered,
}

/// One extracted figure candidate.
#[derive(Debug, Clone)]
pub struct FigureImage {
    /// Dense index in page-then-reading order across the document.
    pub id: usize,
    pub page: u32,
    pub bounds: PlacementRect,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub method: ExtractionMethod,
}

impl FigureImage {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// A figure found on one page, before document-wide numbering.
#[derive(Debug, Clone)]
pub struct PageFigure {
    pub bounds: PlacementRect,
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub method: ExtractionMethod,
}

/// Result of one page's extraction.
#[derive(Debug, Default)]
pub struct PageExtraction {
    /// Accepted figures in reading order.
    pub figures: Vec<PageFigure>,
    /// Raw image objects the source reported.
    pub raw_objects: usize,
    /// Regions whose rasterization failed and were skipped.
    pub failed_regions: usize,
}

/// Result of a whole-document pass.
#[derive(Debug, Default)]
pub struct DocumentExtraction {
    pub images: Vec<FigureImage>,
    pub raw_objects: usize,
    pub failed_regions: usize,
    /// Pages whose images could not be listed at all.
    pub failed_pages: Vec<u32>,
}

/// Per-page rendering state; the snapshot is requested at most once, and only when some
/// region actually needs rasterizing.
struct PageCanvas<'a> {
    source: &'a dyn PageSource,
    page: u32,
    bounds: PlacementRect,
    zoom: f32,
    snapshot: OnceCell<Option<RgbaImage>>,
}

impl PageCanvas<'_> {
    fn snapshot(&self) -> Option<&RgbaImage> {
        self.snapshot
            .get_or_init(|| match self.source.render_page(self.page, self.zoom) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(page = self.page, "page snapshot failed, compositing instead: {err}");
                    None
                }
            })
            .as_ref()
    }
}

pub struct FigureExtractionPipeline {
    config: ExtractionConfig,
    rasterizer: RegionRasterizer,
}

impl FigureExtractionPipeline {
    pub fn new(config: ExtractionConfig) -> Self {
        let rasterizer = RegionRasterizer::new(config.zoom, config.margin);
        Self { config, rasterizer }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract every page in order and number the figures densely.
    ///
    /// A page that fails is logged and contributes nothing; the pass always completes.
    pub fn extract_document(&self, source: &dyn PageSource) -> DocumentExtraction {
        let mut output = DocumentExtraction::default();
        for page in 1..=source.page_count() as u32 {
            let extraction = match self.extract_page(source, page) {
                Ok(extraction) => extraction,
                Err(err) => {
                    warn!(page, "skipping page images: {err}");
                    output.failed_pages.push(page);
                    continue;
                }
            };
            output.raw_objects += extraction.raw_objects;
            output.failed_regions += extraction.failed_regions;
            for figure in extraction.figures {
                output.images.push(FigureImage {
                    id: output.images.len(),
                    page,
                    bounds: figure.bounds,
                    bytes: figure.bytes,
                    format: figure.format,
                    method: figure.method,
                });
            }
        }
        info!(
            mode = ?self.config.mode,
            pages = source.page_count(),
            raw_objects = output.raw_objects,
            figures = output.images.len(),
            "figure extraction finished"
        );
        output
    }

    /// Extract one page with the configured strategy.
    pub fn extract_page(
        &self,
        source: &dyn PageSource,
        page: u32,
    ) -> Result<PageExtraction, FigureError> {
        let images = source.page_images(page)?;
        let mut extraction = PageExtraction {
            raw_objects: images.len(),
            ..PageExtraction::default()
        };
        if images.is_empty() {
            return Ok(extraction);
        }

        let bounds = match source.page_size(page) {
            Ok(bounds) => bounds,
            Err(err) => {
                warn!(page, "page size unavailable, clipping to image extent: {err}");
                images
                    .iter()
                    .skip(1)
                    .fold(images[0].rect, |acc, img| acc.union(&img.rect))
            }
        };
        let canvas = PageCanvas {
            source,
            page,
            bounds,
            zoom: self.config.zoom,
            snapshot: OnceCell::new(),
        };

        match self.config.mode {
            ExtractionMode::RegionCrop => self.region_crop(&canvas, &images, &mut extraction),
            ExtractionMode::FragmentMerge => {
                self.fragment_merge(&canvas, &images, &mut extraction)
            }
            ExtractionMode::RawFiltered => self.raw_filtered(&images, &mut extraction),
            ExtractionMode::Hybrid => {
                self.region_crop(&canvas, &images, &mut extraction);
                if extraction.figures.is_empty() {
                    debug!(page, "region crop found nothing, trying fragment merge");
                    self.fragment_merge(&canvas, &images, &mut extraction);
                }
            }
        }

        extraction
            .figures
            .sort_by(|a, b| a.bounds.reading_order(&b.bounds));
        debug!(page, figures = extraction.figures.len(), "page extracted");
        Ok(extraction)
    }

    fn passes_geometry(&self, rect: &PlacementRect) -> bool {
        rect.area() >= self.config.min_bbox_area
            && rect.aspect_ratio() <= self.config.max_aspect_ratio
    }

    fn passes_size(&self, bytes: &[u8]) -> bool {
        bytes.len() >= self.config.min_image_size
    }

    fn rasterize(
        &self,
        canvas: &PageCanvas<'_>,
        region: &MergedRegion,
        method: ExtractionMethod,
        extraction: &mut PageExtraction,
    ) {
        match self
            .rasterizer
            .rasterize(region, &canvas.bounds, canvas.snapshot())
        {
            Ok(bytes) if self.passes_size(&bytes) => extraction.figures.push(PageFigure {
                bounds: region.bounds,
                bytes,
                format: ImageFormat::Png,
                method,
            }),
            Ok(bytes) => debug!(
                page = canvas.page,
                size = bytes.len(),
                "rasterized region below size threshold"
            ),
            Err(err) => {
                warn!(page = canvas.page, "region rasterization failed: {err}");
                extraction.failed_regions += 1;
            }
        }
    }

    fn region_crop(
        &self,
        canvas: &PageCanvas<'_>,
        images: &[RawImageObject],
        extraction: &mut PageExtraction,
    ) {
        for region in merge_objects(images.to_vec(), self.config.merge_threshold) {
            if self.passes_geometry(&region.bounds) {
                self.rasterize(canvas, &region, ExtractionMethod::RegionCrop, extraction);
            }
        }
    }

    fn fragment_merge(
        &self,
        canvas: &PageCanvas<'_>,
        images: &[RawImageObject],
        extraction: &mut PageExtraction,
    ) {
        let fragments: Vec<RawImageObject> = images
            .iter()
            .filter(|img| img.byte_size() > self.config.fragment_min_bytes)
            .cloned()
            .collect();

        for mut group in merge_objects(fragments, self.config.group_threshold) {
            if !self.passes_geometry(&group.bounds) {
                continue;
            }
            if group.members.len() > 1 {
                self.rasterize(canvas, &group, ExtractionMethod::MergedRegion, extraction);
                continue;
            }
            let Some(single) = group.members.pop() else {
                continue;
            };
            if self.passes_size(&single.bytes) {
                extraction.figures.push(PageFigure {
                    bounds: single.rect,
                    bytes: single.bytes,
                    format: single.format,
                    method: ExtractionMethod::SingleImage,
                });
            }
        }
    }

    fn raw_filtered(&self, images: &[RawImageObject], extraction: &mut PageExtraction) {
        for image in images {
            if self.passes_size(&image.bytes) && self.passes_geometry(&image.rect) {
                extraction.figures.push(PageFigure {
                    bounds: image.rect,
                    bytes: image.bytes.clone(),
                    format: image.format,
                    method: ExtractionMethod::RawFiltered,
                });
            }
        }
    }
}
