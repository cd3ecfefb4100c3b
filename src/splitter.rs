//! Splitting a figure into its panels.
//!
//! Segmentation is a black box behind [`SubfigureSplitter`]. The stock implementation,
//! [`CommandSplitter`], runs the figure-separator script as a child process with a deadline
//! and crops the panels it reports.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::GenericImageView;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SplitterConfig;
use crate::error::FigureError;

/// Labels never go past the tenth panel.
const MAX_PANELS: usize = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One cropped panel on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subfigure {
    pub label: String,
    pub path: PathBuf,
}

/// Where a figure stands with respect to panel splitting.
///
/// Every state other than `NotAttempted` is terminal for the lifetime of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SplitState {
    #[default]
    NotAttempted,
    /// No splitter was installed when the split was requested.
    Unavailable,
    /// The splitter ran and found no panels.
    Empty,
    Failed(String),
    Split(Vec<Subfigure>),
}

impl SplitState {
    pub fn is_attempted(&self) -> bool {
        !matches!(self, Self::NotAttempted)
    }

    /// Panels in label order; empty unless the split succeeded.
    pub fn subfigures(&self) -> &[Subfigure] {
        match self {
            Self::Split(panels) => panels,
            _ => &[],
        }
    }

    /// Find a panel by label. A letter also finds the panel numbered at the same position,
    /// and vice versa, so "3b" resolves against `figure_3-2.png`.
    pub fn subfigure(&self, label: &str) -> Option<&Subfigure> {
        let panels = self.subfigures();
        let label = label.to_ascii_lowercase();
        panels
            .iter()
            .find(|panel| panel.label == label)
            .or_else(|| {
                let index = label_index(&label)?;
                panels.iter().find(|panel| label_index(&panel.label) == Some(index))
            })
    }

    /// The state left behind by one split attempt.
    pub fn from_outcome(outcome: SplitOutcome) -> Self {
        match outcome {
            Ok(panels) if panels.is_empty() => Self::Empty,
            Ok(panels) => Self::Split(panels),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// Zero-based position of a panel label: `a` and `1` are both 0.
fn label_index(label: &str) -> Option<usize> {
    if let Ok(number) = label.parse::<usize>() {
        return number.checked_sub(1);
    }
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() => Some((c as u8 - b'a') as usize),
        _ => None,
    }
}

pub type SplitOutcome = Result<Vec<Subfigure>, FigureError>;

pub trait SubfigureSplitter {
    /// Whether the segmentation backend is installed at all.
    fn is_available(&self) -> bool;

    /// Detect panels in `image` and write each one into `output_dir`.
    fn split(&self, image: &Path, output_dir: &Path, figure_number: u32) -> SplitOutcome;
}

/// A splitter for environments without a segmentation backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSplitter;

impl SubfigureSplitter for UnavailableSplitter {
    fn is_available(&self) -> bool {
        false
    }

    fn split(&self, _image: &Path, _output_dir: &Path, _figure_number: u32) -> SplitOutcome {
        Err(FigureError::Splitter("no subfigure splitter installed".into()))
    }
}

/// One panel as reported by the separator, in source pixels.
#[derive(Debug, Clone, Deserialize)]
struct Detection {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    #[serde(default)]
    conf: f32,
}

/// Runs `python main.py --images <dir> --model <model> --output <dir> --annotate 0`.
#[derive(Debug, Clone)]
pub struct CommandSplitter {
    config: SplitterConfig,
}

impl CommandSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    fn run_separator(&self, input_dir: &Path, work_dir: &Path) -> Result<(), FigureError> {
        let log_path = work_dir.join("separator.log");
        let mut child = Command::new(&self.config.python)
            .arg(&self.config.script)
            .arg("--images")
            .arg(input_dir)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--output")
            .arg(work_dir)
            .arg("--annotate")
            .arg("0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&log_path)?))
            .spawn()?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => {
                    let log = fs::read_to_string(&log_path).unwrap_or_default();
                    let tail: String = log.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
                    return Err(FigureError::Splitter(format!(
                        "separator exited with {status}: {tail}"
                    )));
                }
                None if started.elapsed() > timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FigureError::Splitter(format!(
                        "separator timed out after {}s",
                        self.config.timeout_secs
                    )));
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

impl SubfigureSplitter for CommandSplitter {
    fn is_available(&self) -> bool {
        self.config.script.is_file() && self.config.model.is_file()
    }

    fn split(&self, image: &Path, output_dir: &Path, figure_number: u32) -> SplitOutcome {
        if !self.is_available() {
            return Err(FigureError::Splitter(format!(
                "separator script {} or model {} is missing",
                self.config.script.display(),
                self.config.model.display()
            )));
        }
        let file_name = image
            .file_name()
            .ok_or_else(|| FigureError::Splitter(format!("{} is not a file", image.display())))?;

        // Only the one image goes through the model.
        let work_dir = tempfile::TempDir::new()?;
        let input_dir = work_dir.path().join("input");
        fs::create_dir(&input_dir)?;
        fs::copy(image, input_dir.join(file_name))?;

        let started = Instant::now();
        self.run_separator(&input_dir, work_dir.path())?;
        debug!(figure_number, elapsed = ?started.elapsed(), "separator finished");

        let mut report = file_name.to_os_string();
        report.push(".json");
        let report = work_dir.path().join(report);
        if !report.is_file() {
            info!(figure_number, "separator reported no panels");
            return Ok(Vec::new());
        }
        let detections: Vec<Detection> = serde_json::from_str(&fs::read_to_string(&report)?)?;
        crop_panels(
            image,
            detections,
            output_dir,
            figure_number,
            self.config.min_confidence,
            self.config.numeric_labels,
        )
    }
}

/// Keep confident detections, order them top-to-bottom then left-to-right, and save each
/// crop as `figure_{n}{sep}{label}.png`.
fn crop_panels(
    image: &Path,
    mut detections: Vec<Detection>,
    output_dir: &Path,
    figure_number: u32,
    min_confidence: f32,
    numeric_labels: bool,
) -> SplitOutcome {
    let total = detections.len();
    detections.retain(|d| d.conf >= min_confidence);
    if detections.is_empty() {
        debug!(figure_number, total, "no confident panel detections");
        return Ok(Vec::new());
    }
    detections.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let source = image::open(image)?;
    let (width, height) = source.dimensions();
    fs::create_dir_all(output_dir)?;

    let mut panels: Vec<Subfigure> = Vec::new();
    for (rank, detection) in detections.iter().enumerate() {
        if panels.len() == MAX_PANELS {
            break;
        }
        let x0 = detection.x.max(0.0).round() as u32;
        let y0 = detection.y.max(0.0).round() as u32;
        let x1 = ((detection.x + detection.w).round().max(0.0) as u32).min(width);
        let y1 = ((detection.y + detection.h).round().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            warn!(figure_number, rank, "skipping empty panel detection");
            continue;
        }

        let index = panels.len();
        let (label, separator) = if numeric_labels {
            ((index + 1).to_string(), "-")
        } else {
            (char::from(b'a' + index as u8).to_string(), "")
        };
        let path = output_dir.join(format!("figure_{figure_number}{separator}{label}.png"));
        source
            .crop_imm(x0, y0, x1 - x0, y1 - y0)
            .save_with_format(&path, image::ImageFormat::Png)?;
        debug!(figure_number, %label, conf = detection.conf, "saved panel");
        panels.push(Subfigure { label, path });
    }

    info!(figure_number, panels = panels.len(), "figure split");
    Ok(panels)
}
