//! Tunables for one document load.
//!
//! Every section deserializes with defaults, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! data_dir = "./data"
//!
//! [extraction]
//! mode = "region_crop"
//! min_image_size = 30000
//!
//! [splitter]
//! script = "./figure-separator/main.py"
//! model = "./figure-separator/data/figure-sepration-model-submitted-544.pb"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::FigureError;
use crate::merge::{DEFAULT_GROUP_THRESHOLD, DEFAULT_MERGE_THRESHOLD};

/// How figures are cut out of each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Rasterize every merged region of image placements.
    RegionCrop,
    /// Group fragments; rasterize groups, keep lone images verbatim.
    FragmentMerge,
    /// Emit embedded images as they are, filtered only.
    RawFiltered,
    /// Region-crop, falling back to fragment-merge on pages where it finds nothing.
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    /// Minimum encoded size of an accepted figure, in bytes.
    pub min_image_size: usize,
    /// Minimum area of an accepted placement, in square page units.
    pub min_bbox_area: f32,
    /// Maximum ratio of the longer to the shorter side.
    pub max_aspect_ratio: f32,
    pub merge_threshold: f32,
    pub group_threshold: f32,
    /// Fragments below this size are ignored by fragment-merge.
    pub fragment_min_bytes: usize,
    /// Pixels per page unit when rasterizing a region.
    pub zoom: f32,
    /// Page units added around a region before rasterizing.
    pub margin: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            min_image_size: 20_000,
            min_bbox_area: 5_000.0,
            max_aspect_ratio: 8.0,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            group_threshold: DEFAULT_GROUP_THRESHOLD,
            fragment_min_bytes: 5_000,
            zoom: 2.0,
            margin: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Pages searched on each side of a figure's first mention.
    pub window: u32,
    /// Images strictly larger than this are preferred, and swept up by the fallback pass.
    pub high_confidence_bytes: usize,
    /// Second-tier size preference when no candidate clears the high tier.
    pub low_confidence_bytes: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            window: 2,
            high_confidence_bytes: 50_000,
            low_confidence_bytes: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Interpreter used to run the separator script.
    pub python: String,
    pub script: PathBuf,
    pub model: PathBuf,
    pub timeout_secs: u64,
    pub min_confidence: f32,
    /// Label panels `1, 2, 3…` (written as `figure_3-1.png`) instead of `a, b, c…`.
    pub numeric_labels: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            python: "python".into(),
            script: PathBuf::from("./figure-separator/main.py"),
            model: PathBuf::from("./figure-separator/data/figure-sepration-model-submitted-544.pb"),
            timeout_secs: 180,
            min_confidence: 0.3,
            numeric_labels: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the on-disk image store; images go under `<data_dir>/images`.
    pub data_dir: PathBuf,
    pub extraction: ExtractionConfig,
    pub matching: MatchConfig,
    pub splitter: SplitterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            extraction: ExtractionConfig::default(),
            matching: MatchConfig::default(),
            splitter: SplitterConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, FigureError> {
        let config: Self = toml::from_str(text).map_err(|e| FigureError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, FigureError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), FigureError> {
        let e = &self.extraction;
        if !(e.zoom.is_finite() && e.zoom > 0.0) {
            return Err(FigureError::Config(format!("zoom must be positive, got {}", e.zoom)));
        }
        if e.merge_threshold < 0.0 || e.group_threshold < 0.0 || e.margin < 0.0 {
            return Err(FigureError::Config(
                "merge/group thresholds and margin must not be negative".into(),
            ));
        }
        if e.max_aspect_ratio < 1.0 {
            return Err(FigureError::Config(format!(
                "max_aspect_ratio must be at least 1, got {}",
                e.max_aspect_ratio
            )));
        }
        if self.matching.low_confidence_bytes > self.matching.high_confidence_bytes {
            return Err(FigureError::Config(
                "low_confidence_bytes must not exceed high_confidence_bytes".into(),
            ));
        }
        Ok(())
    }
}
