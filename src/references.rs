//! Figure and subfigure citations in page text.
//!
//! Patterns are tried in priority order: subfigure forms, then contextual forms
//! ("see Figure 2"), then bare forms. A later match that overlaps text already claimed by an
//! earlier one is dropped, so "Figure 3a" never also yields a bare citation of figure 3.

use std::collections::HashSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

/// One mention of a figure on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub figure_number: u32,
    /// Lowercased panel label, when the mention names one.
    pub subfigure: Option<String>,
    pub page: u32,
    pub raw_text: String,
    /// Byte offsets into the page text.
    pub start: usize,
    pub end: usize,
}

/// A figure the user asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FigureQuery {
    pub number: u32,
    pub subfigure: Option<String>,
}

struct CitationPattern {
    regex: Regex,
    subfigure: bool,
}

fn compile(patterns: &[(&str, bool)]) -> Vec<CitationPattern> {
    patterns
        .iter()
        .map(|&(pattern, subfigure)| CitationPattern {
            regex: Regex::new(pattern).expect("Invalid citation regex"),
            subfigure,
        })
        .collect()
}

static CITATION_PATTERNS: Lazy<Vec<CitationPattern>> = Lazy::new(|| {
    compile(&[
        // Figure 1a, Figure 1.a, Figure 1-a, Figure 1(a), Figure 1 (a)
        (
            r"(?i)\bfigures?\s*(?P<num>[0-9]+)(?:\s*\(\s*|[-.])?(?P<label>[a-z])(?:\s*\))?",
            true,
        ),
        // Fig. 1a, Fig 1(b)
        (
            r"(?i)\bfig\.?\s*(?P<num>[0-9]+)(?:\s*\(\s*|[-.])?(?P<label>[a-z])(?:\s*\))?",
            true,
        ),
        // 图1a, 图1-a, 图 1(a)
        (
            r"(?i)图\s*(?P<num>[0-9]+)\s*(?:\(\s*|[-.])?(?P<label>[a-z])(?:\s*\))?",
            true,
        ),
        (r"(?i)\b(?:see|in|as|from|of)\s+figures?\s+(?P<num>[0-9]+)", false),
        (r"(?i)[(\[]figures?\s+(?P<num>[0-9]+)[)\]]", false),
        // Figure 1, FIGURE 1, Figure 1:
        (r"(?i)\bfigures?\s*(?P<num>[0-9]+)", false),
        (r"(?i)\bfig\.?\s*(?P<num>[0-9]+)", false),
        (r"图\s*(?P<num>[0-9]+)", false),
    ])
});

static QUERY_PATTERNS: Lazy<Vec<CitationPattern>> = Lazy::new(|| {
    compile(&[
        // 图1子图a, 图1的子图a
        (r"(?i)图\s*(?P<num>[0-9]+)\s*的?\s*子图\s*(?P<label>[a-z])", true),
        (
            r"(?i)\bfig(?:ures?|\.)?\s*(?P<num>[0-9]+)\s*的?\s*子图\s*(?P<label>[a-z])",
            true,
        ),
        (
            r"(?i)\bfig(?:ures?|\.)?\s*(?P<num>[0-9]+)\s*[-.(]?\s*(?P<label>[a-z])(?:\s*\))?",
            true,
        ),
        (
            r"(?i)图\s*(?P<num>[0-9]+)\s*[-.(]?\s*(?P<label>[a-z])(?:\s*\))?",
            true,
        ),
        (r"(?i)\bfig(?:ures?|\.)?\s*(?P<num>[0-9]+)", false),
        (r"图\s*(?P<num>[0-9]+)", false),
    ])
});

fn followed_by_letter(text: &str, at: usize) -> bool {
    text[at..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Number and label of one match, or `None` when the guards reject it.
///
/// A label must be a standalone letter; a bare number must not run straight into one.
fn read_capture(text: &str, caps: &Captures<'_>, subfigure: bool) -> Option<(u32, Option<String>)> {
    let number = caps.name("num")?;
    let figure_number = number.as_str().parse().ok()?;
    if !subfigure {
        return (!followed_by_letter(text, number.end())).then_some((figure_number, None));
    }
    let label = caps.name("label")?;
    if !label.as_str().chars().all(|c| c.is_ascii_alphabetic())
        || followed_by_letter(text, label.end())
    {
        return None;
    }
    Some((figure_number, Some(label.as_str().to_ascii_lowercase())))
}

/// Every citation on one page, deduplicated by `(figure, label)` keeping the earliest, in
/// text order.
pub fn extract_references(text: &str, page: u32) -> Vec<Citation> {
    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut found = Vec::new();

    for pattern in CITATION_PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let span = whole.range();
            if claimed
                .iter()
                .any(|c| c.start < span.end && span.start < c.end)
            {
                continue;
            }
            let Some((figure_number, subfigure)) = read_capture(text, &caps, pattern.subfigure)
            else {
                continue;
            };
            found.push(Citation {
                figure_number,
                subfigure,
                page,
                raw_text: whole.as_str().to_string(),
                start: span.start,
                end: span.end,
            });
            claimed.push(span);
        }
    }

    found.sort_by_key(|c| c.start);
    let mut seen = HashSet::new();
    found.retain(|c| seen.insert((c.figure_number, c.subfigure.clone())));
    found
}

/// The mention plus up to `width` characters on each side, trimmed.
///
/// Returns an empty string when the citation's offsets do not fit `text`.
pub fn citation_context(text: &str, citation: &Citation, width: usize) -> String {
    let (start, end) = (citation.start, citation.end);
    if start > end || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end) {
        return String::new();
    }
    let from = text[..start]
        .char_indices()
        .rev()
        .take(width)
        .last()
        .map_or(start, |(i, _)| i);
    let to = text[end..]
        .char_indices()
        .nth(width)
        .map_or(text.len(), |(i, _)| end + i);
    text[from..to].trim().to_string()
}

/// Which figure a free-form question is about: "figure 3b", "Fig. 2", "图1子图c".
pub fn parse_figure_query(text: &str) -> Option<FigureQuery> {
    QUERY_PATTERNS.iter().find_map(|pattern| {
        pattern.regex.captures_iter(text).find_map(|caps| {
            let (number, subfigure) = if pattern.subfigure {
                read_capture(text, &caps, true)?
            } else {
                (caps.name("num")?.as_str().parse().ok()?, None)
            };
            Some(FigureQuery { number, subfigure })
        })
    })
}
