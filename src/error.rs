use std::io;

use pdf::error::PdfError;
use thiserror::Error;

/// Primary error type for figure extraction and matching.
#[derive(Debug, Error)]
pub enum FigureError {
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("PNG encoding error: {0}")]
    Png(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: usize },
    #[error("region on page {0} produced no drawable content")]
    EmptyRegion(u32),
    #[error("page rendering failed: {0}")]
    Render(String),
    #[error("subfigure splitter failed: {0}")]
    Splitter(String),
    #[error("figure {0} not found")]
    FigureNotFound(u32),
    #[error("subfigure {figure}{label} not found")]
    SubfigureNotFound { figure: u32, label: String },
}

impl FigureError {
    /// Whether the error reports a lookup of something the caller expected to exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FigureNotFound(_) | Self::SubfigureNotFound { .. }
        )
    }
}

impl From<png::EncodingError> for FigureError {
    fn from(err: png::EncodingError) -> Self {
        Self::Png(err.to_string())
    }
}
