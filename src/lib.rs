//! Recover numbered figures from PDF documents.
//!
//! Embedded image fragments are merged back into whole figures, figure citations are read
//! out of the page text, and each cited figure number is bound to the best nearby image.
//! [`DocumentSession`] runs the whole load; the pieces are usable on their own.

pub mod config;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod matcher;
pub mod memory;
pub mod merge;
pub mod pdf_source;
pub mod raster;
pub mod references;
pub mod session;
pub mod source;
pub mod splitter;
pub mod store;

#[cfg(feature = "python")]
mod python;
#[cfg(test)]
mod testing;

pub use config::{Config, ExtractionConfig, ExtractionMode, MatchConfig, SplitterConfig};
pub use error::FigureError;
pub use extract::{ExtractionMethod, FigureExtractionPipeline, FigureImage};
pub use geometry::PlacementRect;
pub use matcher::{FigureMap, FigureRecord, FigureReferenceMatcher, FigureSource, MatchReport};
pub use memory::MemorySource;
pub use pdf_source::PdfSource;
pub use references::{Citation, FigureQuery, extract_references, parse_figure_query};
pub use session::{DocumentSession, FigureLookup, LoadReport};
pub use source::{ImageFormat, PageSource, RawImageObject};
pub use splitter::{CommandSplitter, SplitState, Subfigure, SubfigureSplitter, UnavailableSplitter};
pub use store::ImageStore;
