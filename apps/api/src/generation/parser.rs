//! Section Parser: splits generated text into the seven review sections.
//!
//! Primary strategy: `===== SECTION <n>: <title> =====` boundary markers.
//! When the text carries no boundary markers at all, a table of per-section
//! markdown headings is used instead.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::models::review::{ParsedReview, SectionKind};

/// Any boundary marker; group 1 is the section number.
static BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)={5,}\s*SECTION\s+(\d+)\s*:[^=\n]*={5,}").expect("boundary pattern is valid")
});

/// Heading that opens each section when the model ignored the boundary format.
static FALLBACK_HEADINGS: Lazy<Vec<(SectionKind, Regex)>> = Lazy::new(|| {
    [
        (SectionKind::AtsAnalysis, r"(?i)##\s*1\.\s*STRATEGIC"),
        (SectionKind::BehaviouralQuestions, r"(?i)###\s*Question\s+1:"),
        (SectionKind::TechnicalQuestions, r"(?i)###\s*Technical\s+Question\s+1:"),
        (SectionKind::SkillsGap, r"(?i)##\s*SKILLS\s+GAP\s*&\s*ACTION\s+PLAN"),
        (SectionKind::OptimizedCv, r"(?i)##\s*THE\s+REWRITTEN\b[^\n]*\bCV"),
        (SectionKind::CoverLetter, r"(?i)##\s*THE\b[^\n]*\bCOVER\s+LETTER"),
        (SectionKind::SixSecondTest, r"(?i)###\s*SIX-SECOND\s+RECRUITER\s+TEST"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("heading pattern is valid")))
    .collect()
});

/// A boundary occurrence: which section it opens, where the marker starts and where its body starts.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    kind: Option<SectionKind>,
    start: usize,
    body_start: usize,
}

/// Parses a complete generation. Never fails; sections that cannot be found stay empty.
pub fn parse(full_text: &str) -> ParsedReview {
    let boundaries = find_boundaries(full_text);
    let review = if boundaries.is_empty() {
        parse_headings(full_text)
    } else {
        slice_sections(full_text, &boundaries)
    };

    let missing = review.missing_sections();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|k| k.key()).collect();
        warn!("Generated text is missing sections: {}", names.join(", "));
    }
    review
}

fn find_boundaries(text: &str) -> Vec<Boundary> {
    BOUNDARY
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = caps
                .get(1)
                .and_then(|n| n.as_str().parse::<u8>().ok())
                .and_then(SectionKind::from_number);
            Some(Boundary {
                kind,
                start: whole.start(),
                body_start: whole.end(),
            })
        })
        .collect()
}

/// The body of a section runs from its first boundary to the next boundary of any number.
fn slice_sections(text: &str, boundaries: &[Boundary]) -> ParsedReview {
    let mut review = ParsedReview::default();
    let mut seen = Vec::with_capacity(SectionKind::ALL.len());

    for (i, boundary) in boundaries.iter().enumerate() {
        let Some(kind) = boundary.kind else { continue };
        if seen.contains(&kind) {
            continue;
        }
        seen.push(kind);

        let end = boundaries.get(i + 1).map_or(text.len(), |next| next.start);
        *review.section_mut(kind) = text[boundary.body_start..end].trim().to_string();
    }
    review
}

/// Heading fallback: each recognised heading opens a section that runs to the next one.
/// The heading line stays part of the body.
fn parse_headings(text: &str) -> ParsedReview {
    let mut found: Vec<(usize, SectionKind)> = FALLBACK_HEADINGS
        .iter()
        .filter_map(|(kind, pattern)| pattern.find(text).map(|m| (m.start(), *kind)))
        .collect();
    found.sort_by_key(|(start, _)| *start);

    let mut review = ParsedReview::default();
    for (i, (start, kind)) in found.iter().enumerate() {
        let end = found.get(i + 1).map_or(text.len(), |(next, _)| *next);
        *review.section_mut(*kind) = text[*start..end].trim().to_string();
    }
    review
}

/// Progress estimate for a partially streamed generation, capped below completion.
pub fn estimate_progress(text_len: usize) -> u8 {
    ((text_len as f64 / 4000.0) * 100.0).round().min(95.0) as u8
}

// ────────────────────────────────────────────────────────────────────────────
// Incremental tracking while a generation streams in
// ────────────────────────────────────────────────────────────────────────────

/// A section whose body is final, ready to be announced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSection {
    pub kind: SectionKind,
    pub content: String,
}

/// Watches the accumulated text and reports each section once the next
/// boundary after it has arrived.
#[derive(Debug, Default)]
pub struct SectionTracker {
    announced: Vec<SectionKind>,
}

impl SectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sections completed by the text seen so far and not yet reported.
    pub fn observe(&mut self, accumulated: &str) -> Vec<CompletedSection> {
        let boundaries = find_boundaries(accumulated);
        let closed = boundaries.len().saturating_sub(1);
        self.collect(accumulated, &boundaries[..], closed)
    }

    /// Everything not yet reported, including the last open section.
    pub fn finish(&mut self, full_text: &str) -> Vec<CompletedSection> {
        let boundaries = find_boundaries(full_text);
        let count = boundaries.len();
        self.collect(full_text, &boundaries[..], count)
    }

    fn collect(
        &mut self,
        text: &str,
        boundaries: &[Boundary],
        closed: usize,
    ) -> Vec<CompletedSection> {
        let mut out = Vec::new();
        for (i, boundary) in boundaries.iter().enumerate().take(closed) {
            let Some(kind) = boundary.kind else { continue };
            if self.announced.contains(&kind) {
                continue;
            }
            self.announced.push(kind);
            let end = boundaries.get(i + 1).map_or(text.len(), |next| next.start);
            out.push(CompletedSection {
                kind,
                content: text[boundary.body_start..end].trim().to_string(),
            });
        }
        out
    }
}
