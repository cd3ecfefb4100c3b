//! Whole-document loads over in-memory pages.

mod common;

use common::{noise_png, png_object, rect};
use figmap::{
    Config, DocumentSession, ExtractionMethod, FigureError, FigureSource, MemorySource,
    PageSource, PlacementRect, RawImageObject, SplitState, UnavailableSplitter,
};
use pretty_assertions::assert_eq;

/// Page 1: a figure stored as four tiles plus a corner logo. Page 4: one figure cited in
/// Chinese, far enough away that the two figures never compete.
fn paper() -> MemorySource {
    let tiles = [
        rect(72.0, 100.0, 292.0, 260.0),
        rect(302.0, 100.0, 522.0, 260.0),
        rect(72.0, 270.0, 292.0, 430.0),
        rect(302.0, 270.0, 522.0, 430.0),
    ];
    let mut source = MemorySource::new(4)
        .with_text(
            1,
            "Figure 1 shows the architecture. The four stages (Figure 1a to Figure 1d) run in order.",
        )
        .with_text(4, "如图2所示，误差随训练下降。")
        .with_image(png_object(1, rect(560.0, 740.0, 580.0, 760.0), noise_png(8, 8, 99)))
        .with_image(png_object(4, rect(100.0, 100.0, 500.0, 400.0), noise_png(120, 90, 7)));
    for (seed, tile) in tiles.into_iter().enumerate() {
        source = source.with_image(png_object(1, tile, noise_png(60, 45, seed as u32)));
    }
    source
}

fn config(data_dir: &std::path::Path) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn tiles_become_one_cited_figure() {
    let data = tempfile::tempdir().expect("tempdir");
    let session = DocumentSession::load(&paper(), &config(data.path()), Box::new(UnavailableSplitter))
        .expect("loads");

    let report = session.report();
    assert_eq!(report.pages, 4);
    assert_eq!(report.text_pages, 2);
    assert_eq!(report.raw_objects, 6);
    assert_eq!(report.extracted_images, 2);
    assert_eq!((report.cited, report.matched), (2, 2));
    assert!(report.unmatched.is_empty());

    let first = &session.images()[0];
    assert_eq!(first.page, 1);
    assert_eq!(first.method, ExtractionMethod::RegionCrop);
    assert_eq!(first.bounds, rect(72.0, 100.0, 522.0, 430.0));

    let figure = session.figure(1).expect("figure 1");
    assert_eq!(figure.page, 1);
    assert_eq!(figure.source, FigureSource::Cited);
    assert!(figure.canonical_image_path.is_file());
    let decoded = image::open(&figure.canonical_image_path).expect("png");
    // 450 x 330 units plus a 5 unit margin, at 2x.
    assert_eq!((decoded.width(), decoded.height()), (920, 680));

    assert_eq!(session.figure(2).expect("figure 2").page, 4);
}

#[test]
fn citations_are_kept_per_page() {
    let data = tempfile::tempdir().expect("tempdir");
    let session = DocumentSession::load(&paper(), &config(data.path()), Box::new(UnavailableSplitter))
        .expect("loads");
    let keys: Vec<(u32, Option<&str>, u32)> = session
        .citations()
        .iter()
        .map(|c| (c.figure_number, c.subfigure.as_deref(), c.page))
        .collect();
    assert_eq!(
        keys,
        vec![(1, None, 1), (1, Some("a"), 1), (1, Some("d"), 1), (2, None, 4)]
    );
}

#[test]
fn questions_resolve_to_images() {
    let data = tempfile::tempdir().expect("tempdir");
    let mut session =
        DocumentSession::load(&paper(), &config(data.path()), Box::new(UnavailableSplitter))
            .expect("loads");

    let cjk = session.lookup("请解释图2").expect("lookup").expect("names a figure");
    assert_eq!(cjk.page, 4);
    assert_eq!(cjk.description, vec!["如图2所示，误差随训练下降。"]);

    let panel = session.lookup("What is in Figure 1c?").expect("lookup").expect("names a figure");
    assert_eq!(panel.requested_label.as_deref(), Some("c"));
    assert!(panel.panel.is_none());
    assert_eq!(panel.image_path, session.figure(1).expect("figure 1").canonical_image_path);
    assert_eq!(
        session.figure(1).expect("figure 1").split,
        SplitState::Unavailable
    );
}

#[test]
fn unknown_figures_are_not_found() {
    let data = tempfile::tempdir().expect("tempdir");
    let mut session =
        DocumentSession::load(&paper(), &config(data.path()), Box::new(UnavailableSplitter))
            .expect("loads");

    let err = session.ensure_subfigures(5).unwrap_err();
    assert!(matches!(err, FigureError::FigureNotFound(5)));
    assert!(session.lookup("show figure 5").unwrap_err().is_not_found());
    assert!(!session.figure(1).expect("figure 1").split_attempted());
}

#[test]
fn reloading_replaces_the_previous_store() {
    let data = tempfile::tempdir().expect("tempdir");
    let stale = data.path().join("images/figure_9.png");
    std::fs::create_dir_all(stale.parent().expect("parent")).expect("dir");
    std::fs::write(&stale, b"old").expect("stale file");

    let session = DocumentSession::load(&paper(), &config(data.path()), Box::new(UnavailableSplitter))
        .expect("loads");
    assert!(!stale.exists());
    assert_eq!(session.figure_map().len(), 2);
}

/// Page 4's image stream is unreadable.
struct BrokenLastPage(MemorySource);

impl PageSource for BrokenLastPage {
    fn page_count(&self) -> usize {
        self.0.page_count()
    }

    fn page_size(&self, page: u32) -> Result<PlacementRect, FigureError> {
        self.0.page_size(page)
    }

    fn page_text(&self, page: u32) -> Result<String, FigureError> {
        self.0.page_text(page)
    }

    fn page_images(&self, page: u32) -> Result<Vec<RawImageObject>, FigureError> {
        if page == 4 {
            return Err(FigureError::Io(std::io::Error::other("bad stream")));
        }
        self.0.page_images(page)
    }
}

#[test]
fn broken_pages_do_not_abort_the_load() {
    let data = tempfile::tempdir().expect("tempdir");
    let session = DocumentSession::load(
        &BrokenLastPage(paper()),
        &config(data.path()),
        Box::new(UnavailableSplitter),
    )
    .expect("loads");

    let report = session.report();
    assert_eq!(report.failed_pages, vec![4]);
    assert_eq!(report.extracted_images, 1);
    // Figure 2's only candidate was on the broken page.
    assert_eq!(report.unmatched, vec![2]);
    assert!(session.figure(2).is_err());
}
