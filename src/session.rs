use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FigureError;
use crate::extract::{FigureExtractionPipeline, FigureImage};
use crate::matcher::{FigureMap, FigureRecord, FigureReferenceMatcher};
use crate::references::{Citation, citation_context, extract_references, parse_figure_query};
use crate::source::PageSource;
use crate::splitter::{SplitState, Subfigure, SubfigureSplitter};
use crate::store::ImageStore;

/// Characters of text kept on each side of a mention when describing a figure.
pub const CONTEXT_WIDTH: usize = 250;
/// Distinct passages returned per figure description.
pub const MAX_CONTEXTS: usize = 3;
/// Share of a question's words a description must contain to answer it.
pub const DESCRIPTION_MATCH_THRESHOLD: f32 = 0.2;

/// What a load found, for logs and callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub pages: usize,
    /// Pages that produced any text.
    pub text_pages: usize,
    pub raw_objects: usize,
    pub extracted_images: usize,
    pub citations: usize,
    /// Distinct cited figure numbers.
    pub cited: usize,
    pub matched: usize,
    pub fallback: usize,
    pub unmatched: Vec<u32>,
    pub failed_regions: usize,
    pub failed_pages: Vec<u32>,
}

/// The answer to "show me figure N" or "show me figure Nx".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureLookup {
    pub figure_number: u32,
    pub page: u32,
    /// The label asked for, if any.
    pub requested_label: Option<String>,
    /// The panel served, when the label resolved to one.
    pub panel: Option<Subfigure>,
    /// The panel's image, or the whole figure's when no panel matched.
    pub image_path: PathBuf,
    pub description: Vec<String>,
    /// Word overlap with the description, when the question named no figure.
    pub match_score: Option<f32>,
}

pub struct DocumentSession {
    page_texts: Vec<String>,
    citations: Vec<Citation>,
    images: Vec<FigureImage>,
    figures: FigureMap,
    report: LoadReport,
    store: ImageStore,
    splitter: Box<dyn SubfigureSplitter>,
}

impl DocumentSession {
    /// Extract, cite and match a whole document.
    ///
    /// Pages whose text or images cannot be read are logged and skipped; the load still
    /// succeeds with whatever the rest of the document yields.
    pub fn load(
        source: &dyn PageSource,
        config: &Config,
        splitter: Box<dyn SubfigureSplitter>,
    ) -> Result<Self, FigureError> {
        config.validate()?;
        let store = ImageStore::create(&config.data_dir)?;
        store.clear()?;

        let pages = source.page_count();
        let mut page_texts = Vec::with_capacity(pages);
        let mut citations = Vec::new();
        for page in 1..=pages as u32 {
            let text = source.page_text(page).unwrap_or_else(|err| {
                warn!(page, "page text unavailable: {err}");
                String::new()
            });
            citations.extend(extract_references(&text, page));
            page_texts.push(text);
        }

        let extraction =
            FigureExtractionPipeline::new(config.extraction.clone()).extract_document(source);
        for image in &extraction.images {
            store.write_raw(image)?;
        }

        let matcher = FigureReferenceMatcher::new(config.matching.clone());
        let (figures, matched) =
            matcher.build_map(&extraction.images, &citations, Some(pages), &store)?;

        let report = LoadReport {
            pages,
            text_pages: page_texts.iter().filter(|t| !t.trim().is_empty()).count(),
            raw_objects: extraction.raw_objects,
            extracted_images: extraction.images.len(),
            citations: citations.len(),
            cited: matched.cited,
            matched: matched.matched,
            fallback: matched.fallback,
            unmatched: matched.unmatched,
            failed_regions: extraction.failed_regions,
            failed_pages: extraction.failed_pages,
        };
        info!(
            pages,
            images = report.extracted_images,
            citations = report.citations,
            figures = figures.len(),
            "document loaded"
        );

        Ok(Self {
            page_texts,
            citations,
            images: extraction.images,
            figures,
            report,
            store,
            splitter,
        })
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn figure_map(&self) -> &FigureMap {
        &self.figures
    }

    pub fn figure(&self, number: u32) -> Result<&FigureRecord, FigureError> {
        self.figures.get(number)
    }

    pub fn images(&self) -> &[FigureImage] {
        &self.images
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Text of a 1-based page, empty when the page had none.
    pub fn page_text(&self, page: u32) -> Option<&str> {
        let index = (page as usize).checked_sub(1)?;
        self.page_texts.get(index).map(String::as_str)
    }

    /// Split figure `number` into panels the first time this is asked, and report the
    /// split state every time after. The splitter runs at most once per figure, whatever
    /// it returns.
    pub fn ensure_subfigures(&mut self, number: u32) -> Result<&SplitState, FigureError> {
        let record = self.figures.get_mut(number)?;
        if !record.split.is_attempted() {
            record.split = if self.splitter.is_available() {
                SplitState::from_outcome(self.splitter.split(
                    &record.canonical_image_path,
                    self.store.dir(),
                    number,
                ))
            } else {
                SplitState::Unavailable
            };
            match &record.split {
                SplitState::Failed(reason) => warn!(number, "subfigure split failed: {reason}"),
                state => info!(number, panels = state.subfigures().len(), "subfigure split attempted"),
            }
        }
        Ok(&record.split)
    }

    /// One panel of a figure, splitting it first if needed.
    pub fn subfigure(&mut self, number: u32, label: &str) -> Result<&Subfigure, FigureError> {
        self.ensure_subfigures(number)?
            .subfigure(label)
            .ok_or_else(|| FigureError::SubfigureNotFound {
                figure: number,
                label: label.to_string(),
            })
    }

    /// Up to three distinct passages around mentions of figure `number`. With a label, only
    /// mentions of that panel count.
    pub fn figure_context(&self, number: u32, label: Option<&str>) -> Vec<String> {
        let label = label.map(str::to_ascii_lowercase);
        let mut seen = HashSet::new();
        let mut passages = Vec::new();
        for citation in &self.citations {
            if citation.figure_number != number {
                continue;
            }
            if label.is_some() && citation.subfigure != label {
                continue;
            }
            let Some(text) = self.page_text(citation.page) else {
                continue;
            };
            let passage = citation_context(text, citation, CONTEXT_WIDTH);
            if !passage.is_empty() && seen.insert(passage.clone()) {
                passages.push(passage);
                if passages.len() >= MAX_CONTEXTS {
                    break;
                }
            }
        }
        passages
    }

    /// The figure whose description shares the largest fraction of the question's words,
    /// if that fraction exceeds [`DESCRIPTION_MATCH_THRESHOLD`]. Ties go to the lower number.
    pub fn search_by_description(&self, query: &str) -> Option<(u32, f32)> {
        let query = query.to_lowercase();
        let words: HashSet<&str> = query.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }

        let mut best: Option<(u32, f32)> = None;
        for record in self.figures.iter() {
            let description = self
                .figure_context(record.figure_number, None)
                .join("\n\n")
                .to_lowercase();
            let described: HashSet<&str> = description.split_whitespace().collect();
            let shared = words.iter().filter(|word| described.contains(*word)).count();
            let score = shared as f32 / words.len() as f32;
            if score > best.map_or(0.0, |(_, top)| top) {
                best = Some((record.figure_number, score));
            }
        }
        best.filter(|&(_, score)| score > DESCRIPTION_MATCH_THRESHOLD)
    }

    /// Resolve a free-form question to a figure image.
    ///
    /// A question naming a figure ("figure 3b", "图2") resolves to that figure or panel; a
    /// named panel that cannot be found falls back to the whole figure, and an unknown
    /// figure number is an error. Other questions go through [`Self::search_by_description`];
    /// `Ok(None)` when nothing matches.
    pub fn lookup(&mut self, query: &str) -> Result<Option<FigureLookup>, FigureError> {
        match parse_figure_query(query) {
            Some(named) => self.resolve(named.number, named.subfigure, None).map(Some),
            None => match self.search_by_description(query) {
                Some((number, score)) => {
                    debug!(number, score, "question matched a figure description");
                    self.resolve(number, None, Some(score)).map(Some)
                }
                None => Ok(None),
            },
        }
    }

    fn resolve(
        &mut self,
        number: u32,
        label: Option<String>,
        match_score: Option<f32>,
    ) -> Result<FigureLookup, FigureError> {
        let record = self.figures.get(number)?;
        let (page, whole) = (record.page, record.canonical_image_path.clone());

        let panel = match &label {
            Some(label) => self.ensure_subfigures(number)?.subfigure(label).cloned(),
            None => None,
        };
        let description = self.figure_context(number, label.as_deref());
        Ok(FigureLookup {
            figure_number: number,
            page,
            requested_label: label,
            image_path: panel.as_ref().map_or(whole, |p| p.path.clone()),
            panel,
            description,
            match_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;
    use std::rc::Rc;

    use super::*;
    use crate::config::ExtractionMode;
    use crate::memory::MemorySource;
    use crate::source::{ImageFormat, RawImageObject};
    use crate::splitter::{SplitOutcome, UnavailableSplitter};
    use crate::testing::{noise_png, rect};
    use pretty_assertions::assert_eq;

    /// Pretends every figure has two panels and counts its calls.
    struct CountingSplitter {
        calls: Rc<Cell<usize>>,
    }

    impl SubfigureSplitter for CountingSplitter {
        fn is_available(&self) -> bool {
            true
        }

        fn split(&self, _image: &Path, output_dir: &Path, figure_number: u32) -> SplitOutcome {
            self.calls.set(self.calls.get() + 1);
            Ok(["a", "b"]
                .into_iter()
                .map(|label| Subfigure {
                    label: label.into(),
                    path: output_dir.join(format!("figure_{figure_number}{label}.png")),
                })
                .collect())
        }
    }

    fn source() -> MemorySource {
        MemorySource::new(3)
            .with_text(1, "We propose a method, shown in Figure 1. Figure 1b zooms in.")
            .with_text(3, "Results appear in Figure 2.")
            .with_image(RawImageObject {
                page: 1,
                rect: rect(72.0, 100.0, 540.0, 400.0),
                bytes: noise_png(160, 120, 1),
                format: ImageFormat::Png,
            })
            .with_image(RawImageObject {
                page: 3,
                rect: rect(72.0, 100.0, 540.0, 400.0),
                bytes: noise_png(150, 120, 2),
                format: ImageFormat::Png,
            })
    }

    fn config(data_dir: &Path) -> Config {
        let mut config = Config {
            data_dir: data_dir.to_path_buf(),
            ..Config::default()
        };
        config.extraction.mode = ExtractionMode::RawFiltered;
        config
    }

    #[test]
    fn load_builds_the_figure_map() {
        let data = tempfile::tempdir().expect("tempdir");
        let session = DocumentSession::load(&source(), &config(data.path()), Box::new(UnavailableSplitter))
            .expect("loads");

        let report = session.report();
        assert_eq!(report.pages, 3);
        assert_eq!(report.text_pages, 2);
        assert_eq!(report.extracted_images, 2);
        assert_eq!((report.cited, report.matched, report.fallback), (2, 2, 0));
        assert_eq!(session.figure(1).expect("figure 1").page, 1);
        assert_eq!(session.figure(2).expect("figure 2").page, 3);
        assert!(data.path().join("images/raw_0.png").is_file());
        assert!(data.path().join("images/figure_2.png").is_file());
    }

    #[test]
    fn splitting_an_unknown_figure_is_not_found() {
        let data = tempfile::tempdir().expect("tempdir");
        let calls = Rc::new(Cell::new(0));
        let mut session = DocumentSession::load(
            &source(),
            &config(data.path()),
            Box::new(CountingSplitter { calls: calls.clone() }),
        )
        .expect("loads");

        let err = session.ensure_subfigures(42).unwrap_err();
        assert!(matches!(err, FigureError::FigureNotFound(42)));
        assert!(err.is_not_found());
        assert_eq!(calls.get(), 0);
        assert!(session.figure_map().iter().all(|r| !r.split_attempted()));
    }

    #[test]
    fn splitter_runs_once_per_figure() {
        let data = tempfile::tempdir().expect("tempdir");
        let calls = Rc::new(Cell::new(0));
        let mut session = DocumentSession::load(
            &source(),
            &config(data.path()),
            Box::new(CountingSplitter { calls: calls.clone() }),
        )
        .expect("loads");

        assert_eq!(session.ensure_subfigures(1).expect("split").subfigures().len(), 2);
        session.ensure_subfigures(1).expect("cached");
        session.subfigure(1, "B").expect("panel b");
        assert_eq!(calls.get(), 1);

        let err = session.subfigure(1, "c").unwrap_err();
        assert!(matches!(err, FigureError::SubfigureNotFound { figure: 1, .. }));
        assert_eq!(calls.get(), 1);
        assert!(!session.figure(2).expect("figure 2").split_attempted());
    }

    #[test]
    fn unavailable_splitter_is_recorded_once() {
        let data = tempfile::tempdir().expect("tempdir");
        let mut session =
            DocumentSession::load(&source(), &config(data.path()), Box::new(UnavailableSplitter))
                .expect("loads");
        assert_eq!(session.ensure_subfigures(2).expect("state"), &SplitState::Unavailable);
        assert!(session.figure(2).expect("figure 2").split_attempted());
        assert!(session.figure(2).expect("figure 2").subfigures().is_empty());
    }

    #[test]
    fn lookup_serves_panels_and_falls_back_to_the_whole_figure() {
        let data = tempfile::tempdir().expect("tempdir");
        let mut session = DocumentSession::load(
            &source(),
            &config(data.path()),
            Box::new(CountingSplitter {
                calls: Rc::new(Cell::new(0)),
            }),
        )
        .expect("loads");

        let panel = session.lookup("what is in figure 1b?").expect("lookup").expect("figure");
        assert_eq!(panel.image_path, session.store().dir().join("figure_1b.png"));
        assert_eq!(panel.description, vec!["We propose a method, shown in Figure 1. Figure 1b zooms in."]);

        let missing = session.lookup("Figure 1(d)").expect("lookup").expect("figure");
        assert!(missing.panel.is_none());
        assert_eq!(missing.image_path, session.figure(1).expect("figure 1").canonical_image_path);

        assert!(session.lookup("summarize the paper").expect("lookup").is_none());
        assert!(session.lookup("figure 9").is_err());
    }

    #[test]
    fn questions_without_a_number_match_descriptions() {
        let data = tempfile::tempdir().expect("tempdir");
        let mut session =
            DocumentSession::load(&source(), &config(data.path()), Box::new(UnavailableSplitter))
                .expect("loads");

        // "figure" and "results" against figure 2's passage; figure 1 shares only "figure".
        assert_eq!(
            session.search_by_description("which figure shows the results"),
            Some((2, 0.4))
        );
        assert_eq!(session.search_by_description("What zooms in"), Some((1, 2.0 / 3.0)));
        // One word in five is not enough.
        assert_eq!(session.search_by_description("which figure has the legend"), None);
        assert_eq!(session.search_by_description("   "), None);

        let found = session
            .lookup("which figure shows the results")
            .expect("lookup")
            .expect("matched by description");
        assert_eq!(found.figure_number, 2);
        assert_eq!(found.match_score, Some(0.4));
        assert_eq!(found.requested_label, None);
        assert_eq!(found.image_path, session.figure(2).expect("figure 2").canonical_image_path);
        assert_eq!(found.description, vec!["Results appear in Figure 2."]);
        assert!(!session.figure(2).expect("figure 2").split_attempted());

        let named = session.lookup("Figure 2").expect("lookup").expect("named");
        assert_eq!(named.match_score, None);
    }

    #[test]
    fn context_is_deduplicated_and_capped() {
        let data = tempfile::tempdir().expect("tempdir");
        let session = DocumentSession::load(&source(), &config(data.path()), Box::new(UnavailableSplitter))
            .expect("loads");
        // Both mentions on page 1 yield the same passage.
        assert_eq!(
            session.figure_context(1, None),
            vec!["We propose a method, shown in Figure 1. Figure 1b zooms in."]
        );
        assert_eq!(session.figure_context(2, None), vec!["Results appear in Figure 2."]);
        assert!(session.figure_context(7, None).is_empty());
    }
}
