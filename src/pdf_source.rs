use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "render")]
use image::RgbaImage;
use pdf::content::{Matrix, Op, TextDrawAdjusted};
use pdf::enc::StreamFilter;
use pdf::error::PdfError;
use pdf::file::{CachedFile, FileOptions};
use pdf::font::{Font, ToUnicodeMap, Widths};
use pdf::object::{ColorSpace, ImageXObject, Page, PageRc, Rectangle as Rect, Resolve, XObject};
use pdf::primitive::PdfString;
use png::ColorType;
use tracing::{debug, warn};

use crate::error::FigureError;
use crate::geometry::PlacementRect;
use crate::raster::encode_png;
use crate::source::{ImageFormat, PageSource, RawImageObject};

/// US Letter, used when a page has no resolvable media box.
const FALLBACK_MEDIA_BOX: Rect = Rect {
    left: 0.0,
    bottom: 0.0,
    right: 612.0,
    top: 792.0,
};

/// A PDF document opened for figure extraction.
pub struct PdfSource {
    file: CachedFile<Vec<u8>>,
    #[cfg(feature = "render")]
    data: Vec<u8>,
    #[cfg(feature = "render")]
    renderer: Option<render::PageRenderer>,
}

impl PdfSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FigureError> {
        Self::from_bytes(std::fs::read(path.as_ref())?)
    }

    /// Parse an in-memory document. Page snapshots need a pdfium library next to the
    /// executable or on the system search path; without one regions are composited.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FigureError> {
        let file = FileOptions::cached().load(data.clone())?;
        Ok(Self {
            file,
            #[cfg(feature = "render")]
            data,
            #[cfg(feature = "render")]
            renderer: render::PageRenderer::bind(),
        })
    }

    fn page(&self, page: u32) -> Result<PageRc, FigureError> {
        self.check_page(page)?;
        Ok(self.file.get_page(page - 1)?)
    }
}

impl PageSource for PdfSource {
    fn page_count(&self) -> usize {
        self.file.num_pages() as usize
    }

    fn page_size(&self, page: u32) -> Result<PlacementRect, FigureError> {
        let page = self.page(page)?;
        let media = media_box(&page);
        PlacementRect::new(0.0, 0.0, media.right - media.left, media.top - media.bottom)
            .ok_or_else(|| {
                FigureError::Pdf(PdfError::Other {
                    msg: "page has an empty media box".into(),
                })
            })
    }

    fn page_text(&self, page: u32) -> Result<String, FigureError> {
        let page = self.page(page)?;
        let page_ref: &Page = &page;
        let resolver = self.file.resolver();
        let Some(content) = &page_ref.contents else {
            return Ok(String::new());
        };
        let fonts = collect_fonts(page_ref, &resolver)?;
        let operations = content.operations(&resolver)?;

        let mut state = TextState::default();
        let mut runs = Vec::new();
        for op in operations {
            match op {
                Op::BeginText => state.begin_text(),
                Op::SetTextMatrix { matrix } => state.set_text_matrix(matrix),
                Op::MoveTextPosition { translation } => {
                    state.translate_line(translation.x, translation.y)
                }
                Op::TextNewline => state.translate_line(0.0, -state.leading),
                Op::TextFont { name, size } => {
                    state.font = Some(name.as_str().to_owned());
                    state.font_size = size;
                }
                Op::CharSpacing { char_space } => state.char_spacing = char_space,
                Op::WordSpacing { word_space } => state.word_spacing = word_space,
                Op::TextScaling { horiz_scale } => state.horizontal_scale = horiz_scale,
                Op::Leading { leading } => state.leading = leading,
                Op::TextRise { rise } => state.rise = rise,
                Op::TextDraw { text } => show_text(&mut state, &fonts, &text, &mut runs),
                Op::TextDrawAdjusted { array } => {
                    for item in &array {
                        match item {
                            TextDrawAdjusted::Text(text) => {
                                show_text(&mut state, &fonts, text, &mut runs)
                            }
                            TextDrawAdjusted::Spacing(amount) => state.translate_text(
                                -amount / 1000.0 * state.font_size * state.horizontal_scale
                                    / 100.0,
                            ),
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(assemble_text(&runs))
    }

    fn page_images(&self, page_number: u32) -> Result<Vec<RawImageObject>, FigureError> {
        let page = self.page(page_number)?;
        let page_ref: &Page = &page;
        let resolver = self.file.resolver();
        let Some(content) = &page_ref.contents else {
            return Ok(Vec::new());
        };
        let media = media_box(page_ref);
        let operations = content.operations(&resolver)?;
        let resources = page_ref.resources().ok();

        let mut ctm = Matrix::default();
        let mut saved: Vec<Matrix> = Vec::new();
        let mut images = Vec::new();
        for op in operations {
            let decoded = match op {
                Op::Save => {
                    saved.push(ctm);
                    continue;
                }
                Op::Restore => {
                    ctm = saved.pop().unwrap_or_default();
                    continue;
                }
                Op::Transform { matrix } => {
                    ctm = concat_matrix(&ctm, &matrix);
                    continue;
                }
                Op::XObject { name } => {
                    let Some(xobject_ref) = resources.and_then(|res| res.xobjects.get(&name))
                    else {
                        continue;
                    };
                    let xobject = match resolver.get(*xobject_ref) {
                        Ok(xobject) => xobject,
                        Err(err) => {
                            warn!(page = page_number, name = name.as_str(), "unreadable XObject: {err}");
                            continue;
                        }
                    };
                    match &*xobject {
                        XObject::Image(image) => decode_image(image, &resolver),
                        _ => continue,
                    }
                }
                Op::InlineImage { image } => decode_image(&image, &resolver),
                _ => continue,
            };

            let (bytes, format) = match decoded {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(page = page_number, "skipping unreadable image: {err}");
                    continue;
                }
            };
            match placement(&ctm, &media) {
                Some(rect) => images.push(RawImageObject {
                    page: page_number,
                    rect,
                    bytes,
                    format,
                }),
                None => debug!(page = page_number, "skipping image with degenerate placement"),
            }
        }
        Ok(images)
    }

    #[cfg(feature = "render")]
    fn render_page(&self, page: u32, zoom: f32) -> Result<Option<RgbaImage>, FigureError> {
        self.check_page(page)?;
        match &self.renderer {
            Some(renderer) => renderer.render(&self.data, page, zoom).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(feature = "render")]
mod render {
    use image::RgbaImage;
    use pdfium_render::prelude::*;
    use tracing::debug;

    use crate::error::FigureError;

    pub(super) struct PageRenderer {
        pdfium: Pdfium,
    }

    impl PageRenderer {
        pub(super) fn bind() -> Option<Self> {
            let bindings =
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library());
            match bindings {
                Ok(bindings) => Some(Self {
                    pdfium: Pdfium::new(bindings),
                }),
                Err(err) => {
                    debug!("no pdfium library, regions will be composited: {err:?}");
                    None
                }
            }
        }

        /// Page `page` (1-based) at `zoom` pixels per page unit.
        pub(super) fn render(
            &self,
            data: &[u8],
            page: u32,
            zoom: f32,
        ) -> Result<RgbaImage, FigureError> {
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(data, None)
                .map_err(render_err)?;
            let index = u16::try_from(page.saturating_sub(1))
                .map_err(|_| FigureError::Render(format!("page {page} is beyond the renderer")))?;
            let pdf_page = document.pages().get(index).map_err(render_err)?;

            let width = (pdf_page.width().value * zoom).round() as i32;
            let height = (pdf_page.height().value * zoom).round() as i32;
            let bitmap = pdf_page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(width)
                        .set_target_height(height),
                )
                .map_err(render_err)?;

            let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
            RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
                FigureError::Render(format!("page {page} bitmap does not match {width}x{height}"))
            })
        }
    }

    fn render_err(err: PdfiumError) -> FigureError {
        FigureError::Render(format!("{err:?}"))
    }
}

fn media_box(page: &Page) -> Rect {
    page.media_box().unwrap_or(FALLBACK_MEDIA_BOX)
}

/// Placement of the unit square under `ctm`, flipped into top-left page space.
fn placement(ctm: &Matrix, media: &Rect) -> Option<PlacementRect> {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].map(|p| apply_matrix(ctm, p));
    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for (x, y) in corners {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    PlacementRect::new(
        min_x - media.left,
        media.top - max_y,
        max_x - media.left,
        media.top - min_y,
    )
}

fn apply_matrix(m: &Matrix, (x, y): (f32, f32)) -> (f32, f32) {
    (m.a * x + m.c * y + m.e, m.b * x + m.d * y + m.f)
}

/// `next × current`: the matrix an operand of `cm` produces when applied to the current CTM.
fn concat_matrix(current: &Matrix, next: &Matrix) -> Matrix {
    Matrix {
        a: next.a * current.a + next.b * current.c,
        b: next.a * current.b + next.b * current.d,
        c: next.c * current.a + next.d * current.c,
        d: next.c * current.b + next.d * current.d,
        e: next.e * current.a + next.f * current.c + current.e,
        f: next.e * current.b + next.f * current.d + current.f,
    }
}

fn translation(tx: f32, ty: f32) -> Matrix {
    Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: tx,
        f: ty,
    }
}

fn multiply_matrix(left: &Matrix, right: &Matrix) -> Matrix {
    Matrix {
        a: left.a * right.a + left.b * right.c,
        b: left.a * right.b + left.b * right.d,
        c: left.c * right.a + left.d * right.c,
        d: left.c * right.b + left.d * right.d,
        e: left.e * right.a + left.f * right.c + right.e,
        f: left.e * right.b + left.f * right.d + right.f,
    }
}

/// Decode an image object into storable bytes.
///
/// 8-bit RGB and grayscale samples are re-encoded as PNG; everything else keeps its encoded
/// stream and is tagged with the stream filter.
fn decode_image(
    image: &ImageXObject,
    resolver: &impl Resolve,
) -> Result<(Vec<u8>, ImageFormat), FigureError> {
    let (width, height) = (image.width, image.height);
    let bits = image.bits_per_component.unwrap_or(8);
    let color = match (image.color_space.as_ref(), bits) {
        (Some(ColorSpace::DeviceRGB) | None, 8) => Some((ColorType::Rgb, 3)),
        (Some(ColorSpace::DeviceGray), 8) => Some((ColorType::Grayscale, 1)),
        _ => None,
    };

    if let Some((color, channels)) = color {
        // Streams that only decode partially fall through to the encoded bytes.
        if let Ok(samples) = image.image_data(resolver) {
            let expected = width as usize * height as usize * channels;
            if samples.len() == expected {
                let png = encode_png(samples.as_ref(), width, height, color)?;
                return Ok((png, ImageFormat::Png));
            }
        }
    }

    let (data, filter) = image.raw_image_data(resolver)?;
    let format = match filter {
        Some(StreamFilter::DCTDecode(_)) => ImageFormat::Jpeg,
        Some(StreamFilter::JPXDecode) => ImageFormat::Jpx,
        Some(StreamFilter::JBIG2Decode(_)) => ImageFormat::Jbig2,
        Some(StreamFilter::CCITTFaxDecode(_)) => ImageFormat::Fax,
        Some(StreamFilter::FlateDecode(_)) => ImageFormat::Flate,
        _ => ImageFormat::Raw,
    };
    Ok((data.to_vec(), format))
}

/// Text state relevant to positioning glyph runs.
#[derive(Debug)]
struct TextState {
    font: Option<String>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
    text_matrix: Matrix,
    line_matrix: Matrix,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 100.0,
            leading: 0.0,
            rise: 0.0,
            text_matrix: Matrix::default(),
            line_matrix: Matrix::default(),
        }
    }
}

impl TextState {
    fn begin_text(&mut self) {
        self.text_matrix = Matrix::default();
        self.line_matrix = Matrix::default();
    }

    fn set_text_matrix(&mut self, matrix: Matrix) {
        self.text_matrix = matrix;
        self.line_matrix = matrix;
    }

    fn translate_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply_matrix(&translation(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn translate_text(&mut self, tx: f32) {
        if tx != 0.0 {
            self.text_matrix = multiply_matrix(&translation(tx, 0.0), &self.text_matrix);
        }
    }

    fn origin(&self) -> (f32, f32) {
        apply_matrix(&self.text_matrix, (0.0, 0.0))
    }

    /// Rendered glyph height: font size scaled by the vertical axis of the text matrix.
    fn rendered_size(&self) -> f32 {
        let m = &self.text_matrix;
        let scale = (m.c * m.c + m.d * m.d).sqrt();
        if scale > 0.0 {
            self.font_size * scale
        } else {
            self.font_size
        }
    }
}

/// Widths and Unicode mapping of a page font.
struct ResolvedFont {
    widths: Option<Widths>,
    to_unicode: Option<ToUnicodeMap>,
    is_cid: bool,
}

impl ResolvedFont {
    fn from_font(font: &Font, resolver: &impl Resolve) -> Result<Self, PdfError> {
        let to_unicode = font.to_unicode(resolver).transpose()?;
        Ok(Self {
            widths: font.widths(resolver)?,
            to_unicode,
            is_cid: font.is_cid(),
        })
    }

    fn glyph_width(&self, code: u16) -> f32 {
        self.widths
            .as_ref()
            .map(|w| w.get(code as usize))
            .unwrap_or(1000.0)
    }
}

fn collect_fonts(
    page: &Page,
    resolver: &impl Resolve,
) -> Result<HashMap<String, ResolvedFont>, PdfError> {
    let mut fonts = HashMap::new();
    if let Ok(resources) = page.resources() {
        for (name, font) in resources.fonts.iter() {
            fonts.insert(name.as_str().to_owned(), ResolvedFont::from_font(&*font.load(resolver)?, resolver)?);
        }
    }
    Ok(fonts)
}

/// Decode a string operand into text plus the character codes used for advance widths.
fn decode_string(bytes: &[u8], font: Option<&ResolvedFont>) -> (String, Vec<u16>) {
    let codes: Vec<u16> = match font {
        Some(f) if f.is_cid => bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect(),
        _ => bytes.iter().map(|&b| u16::from(b)).collect(),
    };
    let map = font.and_then(|f| f.to_unicode.as_ref());
    let mut text = String::with_capacity(codes.len());
    for &code in &codes {
        match map.and_then(|m| m.get(code)) {
            Some(mapped) => text.push_str(mapped),
            None => text.push(char::from_u32(u32::from(code)).unwrap_or('\u{FFFD}')),
        }
    }
    (text, codes)
}

/// A contiguous glyph run in text space.
#[derive(Debug)]
struct TextRun {
    text: String,
    x: f32,
    y: f32,
    end_x: f32,
    size: f32,
}

fn show_text(
    state: &mut TextState,
    fonts: &HashMap<String, ResolvedFont>,
    text: &PdfString,
    runs: &mut Vec<TextRun>,
) {
    let font = state.font.as_ref().and_then(|name| fonts.get(name));
    let (decoded, codes) = decode_string(text.as_bytes(), font);
    if decoded.is_empty() {
        return;
    }

    let (x, y) = state.origin();
    let mut advance = 0.0;
    for &code in &codes {
        let width = font.map(|f| f.glyph_width(code)).unwrap_or(1000.0);
        advance += width / 1000.0 * state.font_size + state.char_spacing;
        if code == 32 {
            advance += state.word_spacing;
        }
    }
    state.translate_text(advance * state.horizontal_scale / 100.0);

    runs.push(TextRun {
        text: decoded,
        x,
        y: y + state.rise,
        end_x: state.origin().0,
        size: state.rendered_size(),
    });
}

/// Join glyph runs into lines: a baseline jump starts a new line, a horizontal gap wider
/// than a fraction of the font size inserts a space.
fn assemble_text(runs: &[TextRun]) -> String {
    let mut out = String::new();
    let mut previous: Option<&TextRun> = None;
    for run in runs {
        if let Some(prev) = previous {
            let line_tolerance = (prev.size.max(run.size) * 0.5).max(1.0);
            if (run.y - prev.y).abs() > line_tolerance {
                out.push('\n');
            } else if run.x - prev.end_x > prev.size * 0.15
                && !out.ends_with(' ')
                && !run.text.starts_with(' ')
            {
                out.push(' ');
            }
        }
        out.push_str(&run.text);
        previous = Some(run);
    }
    out
}
