use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::FigureError;
use crate::extract::FigureImage;

#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Use `<data_dir>/images`, creating it if needed.
    pub fn create(data_dir: impl AsRef<Path>) -> Result<Self, FigureError> {
        let dir = data_dir.as_ref().join("images");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove every image a previous load wrote, subfigure panels included.
    pub fn clear(&self) -> Result<usize, FigureError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if (name.starts_with("raw_") || name.starts_with("figure_")) && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        debug!(dir = %self.dir.display(), removed, "cleared image store");
        Ok(removed)
    }

    /// `raw_{id}.{ext}`
    pub fn write_raw(&self, image: &FigureImage) -> Result<PathBuf, FigureError> {
        self.write(format!("raw_{}.{}", image.id, image.format.extension()), &image.bytes)
    }

    /// `figure_{n}.{ext}`, the canonical image of figure `n`.
    pub fn write_figure(&self, number: u32, image: &FigureImage) -> Result<PathBuf, FigureError> {
        self.write(format!("figure_{number}.{}", image.format.extension()), &image.bytes)
    }

    fn write(&self, name: String, bytes: &[u8]) -> Result<PathBuf, FigureError> {
        let path = self.dir.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractionMethod;
    use crate::source::ImageFormat;
    use crate::testing::rect;

    fn image(id: usize, format: ImageFormat) -> FigureImage {
        FigureImage {
            id,
            page: 1,
            bounds: rect(0.0, 0.0, 100.0, 100.0),
            bytes: vec![id as u8; 16],
            format,
            method: ExtractionMethod::RawFiltered,
        }
    }

    #[test]
    fn names_follow_the_store_layout() {
        let data = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::create(data.path()).expect("store");
        assert_eq!(store.dir(), data.path().join("images"));

        let raw = store.write_raw(&image(4, ImageFormat::Jpeg)).expect("raw");
        assert_eq!(raw, data.path().join("images/raw_4.jpeg"));
        let figure = store.write_figure(2, &image(4, ImageFormat::Png)).expect("figure");
        assert_eq!(figure, data.path().join("images/figure_2.png"));
        assert_eq!(fs::read(&figure).expect("readable"), vec![4u8; 16]);
    }

    #[test]
    fn clear_only_touches_store_files() {
        let data = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::create(data.path()).expect("store");
        store.write_raw(&image(0, ImageFormat::Png)).expect("raw");
        store.write_figure(1, &image(0, ImageFormat::Png)).expect("figure");
        fs::write(store.dir().join("figure_1a.png"), b"panel").expect("panel");
        fs::write(store.dir().join("notes.txt"), b"keep").expect("notes");

        assert_eq!(store.clear().expect("cleared"), 3);
        assert!(store.dir().join("notes.txt").exists());
    }
}
