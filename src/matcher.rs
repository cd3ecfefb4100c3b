//! Binding cited figure numbers to extracted images.
//!
//! Each cited number, in ascending order, takes the best unused image within a page window
//! around its first mention. Large images nobody cited are then numbered after the highest
//! cited figure.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::MatchConfig;
use crate::error::FigureError;
use crate::extract::FigureImage;
use crate::references::Citation;
use crate::splitter::{SplitState, Subfigure};
use crate::store::ImageStore;

/// Why a figure number points at its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureSource {
    /// The number was cited in the text near the image.
    Cited,
    /// A large uncited image, numbered after the cited ones.
    Fallback,
}

/// A number-to-image assignment, before anything is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub image_id: usize,
    pub page: u32,
    pub source: FigureSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub bindings: BTreeMap<u32, Binding>,
    /// Cited numbers whose page window held no unused image.
    pub unmatched: Vec<u32>,
}

/// Counts from one matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// Distinct cited figure numbers.
    pub cited: usize,
    /// Cited numbers that received an image.
    pub matched: usize,
    /// Numbers handed out by the fallback pass.
    pub fallback: usize,
    pub unmatched: Vec<u32>,
}

/// One resolved figure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureRecord {
    pub figure_number: u32,
    pub canonical_image_path: PathBuf,
    pub page: u32,
    pub image_id: usize,
    pub source: FigureSource,
    pub split: SplitState,
}

impl FigureRecord {
    pub fn split_attempted(&self) -> bool {
        self.split.is_attempted()
    }

    pub fn subfigures(&self) -> &[Subfigure] {
        self.split.subfigures()
    }
}

/// Figure number to record, for one loaded document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FigureMap {
    records: BTreeMap<u32, FigureRecord>,
}

impl FigureMap {
    pub fn get(&self, number: u32) -> Result<&FigureRecord, FigureError> {
        self.records
            .get(&number)
            .ok_or(FigureError::FigureNotFound(number))
    }

    pub(crate) fn get_mut(&mut self, number: u32) -> Result<&mut FigureRecord, FigureError> {
        self.records
            .get_mut(&number)
            .ok_or(FigureError::FigureNotFound(number))
    }

    pub fn contains(&self, number: u32) -> bool {
        self.records.contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending figure order.
    pub fn iter(&self) -> impl Iterator<Item = &FigureRecord> {
        self.records.values()
    }
}

/// First page each figure number is mentioned on. Page 0 never counts.
pub fn first_mentions(citations: &[Citation]) -> BTreeMap<u32, u32> {
    let mut first = BTreeMap::new();
    for citation in citations.iter().filter(|c| c.page > 0) {
        first
            .entry(citation.figure_number)
            .and_modify(|page: &mut u32| *page = (*page).min(citation.page))
            .or_insert(citation.page);
    }
    first
}

/// Larger images first, then lower ids.
fn preference(a: &FigureImage, b: &FigureImage) -> Ordering {
    a.byte_size()
        .cmp(&b.byte_size())
        .then_with(|| b.id.cmp(&a.id))
}

pub struct FigureReferenceMatcher {
    config: MatchConfig,
}

impl FigureReferenceMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Pages searched for a figure first mentioned on `first`.
    pub fn window(&self, first: u32, page_count: Option<usize>) -> (u32, u32) {
        let low = first.saturating_sub(self.config.window).max(1);
        let mut high = first.saturating_add(self.config.window);
        if let Some(count) = page_count {
            high = high.min(u32::try_from(count).unwrap_or(u32::MAX));
        }
        (low, high)
    }

    fn pick<'a>(&self, pool: &[&'a FigureImage]) -> Option<&'a FigureImage> {
        let tier = |floor: usize| -> Vec<&'a FigureImage> {
            pool.iter().copied().filter(|img| img.byte_size() > floor).collect()
        };
        let high = tier(self.config.high_confidence_bytes);
        let candidates = if !high.is_empty() {
            high
        } else {
            let low = tier(self.config.low_confidence_bytes);
            if low.is_empty() { pool.to_vec() } else { low }
        };
        candidates.into_iter().max_by(|a, b| preference(a, b))
    }

    /// Decide which image each figure number gets. Pure and deterministic.
    pub fn resolve(
        &self,
        images: &[FigureImage],
        citations: &[Citation],
        page_count: Option<usize>,
    ) -> MatchOutcome {
        let mut used: HashSet<usize> = HashSet::new();
        let mut outcome = MatchOutcome::default();

        for (number, first) in first_mentions(citations) {
            let (low, high) = self.window(first, page_count);
            let pool: Vec<&FigureImage> = images
                .iter()
                .filter(|img| (low..=high).contains(&img.page) && !used.contains(&img.id))
                .collect();
            let Some(chosen) = self.pick(&pool) else {
                debug!(number, first, low, high, "no unused image near first mention");
                outcome.unmatched.push(number);
                continue;
            };
            debug!(number, image = chosen.id, page = chosen.page, size = chosen.byte_size(), "matched figure");
            used.insert(chosen.id);
            outcome.bindings.insert(
                number,
                Binding {
                    image_id: chosen.id,
                    page: chosen.page,
                    source: FigureSource::Cited,
                },
            );
        }

        let mut leftovers: Vec<&FigureImage> = images
            .iter()
            .filter(|img| !used.contains(&img.id) && img.byte_size() > self.config.high_confidence_bytes)
            .collect();
        leftovers.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then_with(|| b.byte_size().cmp(&a.byte_size()))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut next = outcome
            .bindings
            .keys()
            .chain(&outcome.unmatched)
            .max()
            .map_or(1, |n| n + 1);
        for image in leftovers {
            while outcome.bindings.contains_key(&next) || outcome.unmatched.contains(&next) {
                next += 1;
            }
            debug!(number = next, image = image.id, page = image.page, "fallback figure");
            used.insert(image.id);
            outcome.bindings.insert(
                next,
                Binding {
                    image_id: image.id,
                    page: image.page,
                    source: FigureSource::Fallback,
                },
            );
            next += 1;
        }
        outcome
    }

    /// Resolve, then write each figure's canonical image into the store.
    pub fn build_map(
        &self,
        images: &[FigureImage],
        citations: &[Citation],
        page_count: Option<usize>,
        store: &ImageStore,
    ) -> Result<(FigureMap, MatchReport), FigureError> {
        let outcome = self.resolve(images, citations, page_count);
        let by_id: BTreeMap<usize, &FigureImage> = images.iter().map(|img| (img.id, img)).collect();

        let mut map = FigureMap::default();
        let mut report = MatchReport {
            cited: first_mentions(citations).len(),
            unmatched: outcome.unmatched.clone(),
            ..MatchReport::default()
        };
        for (number, binding) in outcome.bindings {
            let Some(image) = by_id.get(&binding.image_id) else {
                continue;
            };
            let canonical_image_path = store.write_figure(number, image)?;
            match binding.source {
                FigureSource::Cited => report.matched += 1,
                FigureSource::Fallback => report.fallback += 1,
            }
            map.records.insert(
                number,
                FigureRecord {
                    figure_number: number,
                    canonical_image_path,
                    page: binding.page,
                    image_id: binding.image_id,
                    source: binding.source,
                    split: SplitState::NotAttempted,
                },
            );
        }

        info!(
            cited = report.cited,
            matched = report.matched,
            fallback = report.fallback,
            unmatched = report.unmatched.len(),
            "figure map built"
        );
        Ok((map, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractionMethod;
    use crate::source::ImageFormat;
    use crate::testing::rect;
    use pretty_assertions::assert_eq;

    fn image(id: usize, page: u32, size: usize) -> FigureImage {
        FigureImage {
            id,
            page,
            bounds: rect(0.0, 0.0, 300.0, 300.0),
            bytes: vec![0; size],
            format: ImageFormat::Png,
            method: ExtractionMethod::RegionCrop,
        }
    }

    fn cite(figure_number: u32, page: u32) -> Citation {
        Citation {
            figure_number,
            subfigure: None,
            page,
            raw_text: format!("Figure {figure_number}"),
            start: 0,
            end: 8,
        }
    }

    fn matcher() -> FigureReferenceMatcher {
        FigureReferenceMatcher::new(MatchConfig::default())
    }

    fn assignments(outcome: &MatchOutcome) -> Vec<(u32, usize, FigureSource)> {
        outcome
            .bindings
            .iter()
            .map(|(n, b)| (*n, b.image_id, b.source))
            .collect()
    }

    #[test]
    fn large_image_wins_over_icon_on_the_same_page() {
        let images = [image(0, 3, 80_000), image(1, 3, 5_000)];
        let outcome = matcher().resolve(&images, &[cite(1, 3)], Some(5));
        assert_eq!(assignments(&outcome), vec![(1, 0, FigureSource::Cited)]);
        assert!(outcome.unmatched.is_empty());
    }

    #[test]
    fn windows_follow_first_mention() {
        let images = [image(0, 2, 30_000), image(1, 3, 40_000), image(2, 10, 30_000)];
        let citations = [cite(1, 3), cite(2, 8), cite(2, 9)];
        let outcome = matcher().resolve(&images, &citations, Some(12));
        assert_eq!(
            assignments(&outcome),
            vec![(1, 1, FigureSource::Cited), (2, 2, FigureSource::Cited)]
        );
        assert_eq!(matcher().window(3, Some(12)), (1, 5));
        assert_eq!(matcher().window(8, Some(12)), (6, 10));
        assert_eq!(matcher().window(8, Some(9)), (6, 9));
    }

    #[test]
    fn uncited_large_image_becomes_figure_one() {
        let outcome = matcher().resolve(&[image(0, 5, 200_000)], &[], None);
        assert_eq!(assignments(&outcome), vec![(1, 0, FigureSource::Fallback)]);
    }

    #[test]
    fn each_image_is_bound_at_most_once() {
        let images = [image(0, 1, 60_000)];
        let outcome = matcher().resolve(&images, &[cite(1, 1), cite(2, 1)], Some(1));
        assert_eq!(assignments(&outcome), vec![(1, 0, FigureSource::Cited)]);
        assert_eq!(outcome.unmatched, vec![2]);
    }

    #[test]
    fn tiers_prefer_confident_sizes_then_lower_ids() {
        let images = [image(0, 1, 30_000), image(1, 1, 30_000), image(2, 1, 10_000)];
        let outcome = matcher().resolve(&images, &[cite(4, 1)], None);
        assert_eq!(assignments(&outcome), vec![(4, 0, FigureSource::Cited)]);

        // Only small images: the whole pool competes.
        let images = [image(0, 1, 3_000), image(1, 1, 9_000)];
        let outcome = matcher().resolve(&images, &[cite(1, 1)], None);
        assert_eq!(assignments(&outcome), vec![(1, 1, FigureSource::Cited)]);
    }

    #[test]
    fn fallback_numbers_start_after_every_cited_number() {
        // Figure 3 is cited but nothing is left for it; 4 and 5 go to the uncited images
        // in page order, the larger first on a shared page.
        let images = [
            image(0, 1, 90_000),
            image(1, 9, 60_000),
            image(2, 9, 70_000),
            image(3, 9, 10_000),
        ];
        let citations = [cite(1, 1), cite(3, 1)];
        let outcome = matcher().resolve(&images, &citations, Some(9));
        assert_eq!(
            assignments(&outcome),
            vec![
                (1, 0, FigureSource::Cited),
                (4, 2, FigureSource::Fallback),
                (5, 1, FigureSource::Fallback),
            ]
        );
        assert_eq!(outcome.unmatched, vec![3]);
    }

    #[test]
    fn resolve_is_deterministic() {
        let images: Vec<FigureImage> = (0..12)
            .map(|id| image(id, (id % 6) as u32 + 1, 20_000 + (id % 4) * 15_000))
            .collect();
        let citations = [cite(2, 4), cite(1, 2), cite(3, 6), cite(1, 5)];
        let first = matcher().resolve(&images, &citations, Some(6));
        for _ in 0..5 {
            assert_eq!(matcher().resolve(&images, &citations, Some(6)), first);
        }
    }

    #[test]
    fn nothing_in_nothing_out() {
        assert_eq!(matcher().resolve(&[], &[], Some(3)), MatchOutcome::default());
        let outcome = matcher().resolve(&[], &[cite(1, 1)], Some(3));
        assert!(outcome.bindings.is_empty());
        assert_eq!(outcome.unmatched, vec![1]);
    }

    #[test]
    fn build_map_writes_canonical_images() {
        let data = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::create(data.path()).expect("store");
        let images = [image(0, 3, 80_000), image(1, 7, 120_000)];

        let (map, report) = matcher()
            .build_map(&images, &[cite(1, 3)], Some(8), &store)
            .expect("map");
        assert_eq!(
            report,
            MatchReport {
                cited: 1,
                matched: 1,
                fallback: 1,
                unmatched: Vec::new(),
            }
        );
        let first = map.get(1).expect("figure 1");
        assert_eq!(first.canonical_image_path, store.dir().join("figure_1.png"));
        assert_eq!(first.split, SplitState::NotAttempted);
        assert!(!first.split_attempted());
        assert_eq!(map.get(2).expect("figure 2").source, FigureSource::Fallback);
        assert!(matches!(map.get(9), Err(FigureError::FigureNotFound(9))));
    }
}
