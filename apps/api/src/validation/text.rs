//! Text heuristics shared by the validators.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// CV headers an ATS expects, in the order a recruiter expects them.
pub const REQUIRED_HEADERS: [&str; 5] = ["Contact", "Summary", "Skills", "Experience", "Education"];

/// Phrases that read as machine-written filler.
pub const BANNED_PHRASES: [&str; 27] = [
    "delve",
    "landscape",
    "tapestry",
    "symphony",
    "game-changer",
    "leverage",
    "spearhead",
    "paramount",
    "underscores",
    "in today's fast-paced world",
    "unlock your potential",
    "robust",
    "dynamic",
    "passionate",
    "I am writing to",
    "I am excited to",
    "I am passionate about",
    "demonstrates a strong ability",
    "proven track record",
    "results-driven",
    "synergy",
    "cutting-edge",
    "seasoned professional",
    "forward-thinking",
    "mission-critical",
    "paradigm shift",
    "best-in-class",
];

const SHORT_CV_WORD_LIMIT: usize = 700;
const LONG_CV_WORD_LIMIT: usize = 1400;
const SENIOR_YEARS: u32 = 5;

static BANNED_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    BANNED_PHRASES
        .iter()
        .map(|phrase| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(phrase));
            (*phrase, Regex::new(&pattern).expect("banned phrase pattern is valid"))
        })
        .collect()
});

static YEARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\+?\s*years?\b").expect("years pattern is valid"));

static TABLE_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)<table\b|\|\s*\||^[^\n|]*\|[^\n|]*\|[^\n]*$|\b(?:two|three|multi)-column\b")
        .expect("table pattern is valid")
});

static GRAPHICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)!\[[^\]]*\]\(|<img\b|\.(?:jpe?g|png|svg|gif)\b|\[(?:image|graphic|photo|logo|diagram|chart)\b",
    )
    .expect("graphics pattern is valid")
});

static BULLETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+\.)\s+\S").expect("bullet pattern is valid"));

static STANDARD_FONTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Arial|Calibri|Times New Roman)\b").expect("font pattern is valid"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "against", "all", "also", "and", "any", "are",
        "because", "been", "before", "being", "below", "between", "both", "but", "can", "could",
        "did", "does", "doing", "down", "during", "each", "etc", "few", "for", "from", "further",
        "had", "has", "have", "having", "her", "here", "hers", "herself", "him", "himself", "his",
        "how", "into", "its", "itself", "just", "more", "most", "must", "nor", "not", "now", "off",
        "once", "only", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
        "should", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves",
        "then", "there", "these", "they", "this", "those", "through", "too", "under", "until",
        "upon", "very", "was", "were", "what", "when", "where", "which", "while", "who", "whom",
        "why", "will", "with", "within", "would", "you", "your", "yours", "yourself", "yourselves",
        "able", "across", "per", "via", "well", "including", "may", "might", "shall",
    ]
    .into_iter()
    .collect()
});

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Non-empty sentences, split on terminal punctuation.
pub fn sentences(text: &str) -> Vec<&str> {
    text.split(|c: char| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Mean words per sentence, 0 for text without sentences.
pub fn average_sentence_length(text: &str) -> f64 {
    let sentences = sentences(text);
    if sentences.is_empty() {
        return 0.0;
    }
    let words: usize = sentences.iter().map(|s| word_count(s)).sum();
    words as f64 / sentences.len() as f64
}

pub fn find_banned_phrases(text: &str) -> Vec<&'static str> {
    BANNED_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(phrase, _)| *phrase)
        .collect()
}

pub fn has_table_markup(text: &str) -> bool {
    TABLE_MARKUP.is_match(text)
}

pub fn has_graphics(text: &str) -> bool {
    GRAPHICS.is_match(text)
}

pub fn uses_bullets(text: &str) -> bool {
    BULLETS.is_match(text)
}

pub fn uses_standard_fonts(text: &str) -> bool {
    STANDARD_FONTS.is_match(text)
}

/// A header word must stand alone: "Experienced QA engineer" is not a header.
static HEADER_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(contact|summary|skills|experience|education)\b").expect("header pattern is valid")
});

/// Line index of the first line that opens each required header, in `REQUIRED_HEADERS` order.
/// Leading markdown markers are ignored.
pub fn header_positions(cv: &str) -> [Option<usize>; 5] {
    let mut positions = [None; 5];
    for (line_no, line) in cv.lines().enumerate() {
        let normalized = line
            .trim()
            .trim_start_matches(|c: char| matches!(c, '#' | '*' | '_'))
            .trim()
            .to_lowercase();
        let Some(word) = HEADER_WORD.captures(&normalized).and_then(|caps| caps.get(1)) else {
            continue;
        };
        if let Some(i) = REQUIRED_HEADERS
            .iter()
            .position(|header| header.eq_ignore_ascii_case(word.as_str()))
        {
            if positions[i].is_none() {
                positions[i] = Some(line_no);
            }
        }
    }
    positions
}

/// Required headers found, ordered by where they first appear.
pub fn header_order(positions: &[Option<usize>; 5]) -> Vec<&'static str> {
    let mut found: Vec<(usize, &'static str)> = positions
        .iter()
        .zip(REQUIRED_HEADERS)
        .filter_map(|(pos, header)| pos.map(|p| (p, header)))
        .collect();
    found.sort_by_key(|(p, _)| *p);
    found.into_iter().map(|(_, h)| h).collect()
}

/// All headers present and each after the previous one.
pub fn headers_in_order(positions: &[Option<usize>; 5]) -> bool {
    let mut last = None;
    for pos in positions {
        match (pos, last) {
            (None, _) => return false,
            (Some(p), Some(prev)) if *p < prev => return false,
            (Some(p), _) => last = Some(*p),
        }
    }
    true
}

/// First "N years" mention in the resume.
pub fn years_of_experience(resume: &str) -> Option<u32> {
    YEARS
        .captures(resume)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone, Serialize)]
pub struct LengthCheck {
    pub years_of_experience: Option<u32>,
    pub word_count: usize,
    pub word_limit: Option<usize>,
    pub compliant: bool,
}

/// One page under five years of experience, two pages otherwise. No years found → compliant.
pub fn check_length(resume: &str, cv: &str) -> LengthCheck {
    let years = years_of_experience(resume);
    let word_limit = years.map(|y| {
        if y < SENIOR_YEARS {
            SHORT_CV_WORD_LIMIT
        } else {
            LONG_CV_WORD_LIMIT
        }
    });
    let word_count = word_count(cv);
    LengthCheck {
        years_of_experience: years,
        word_count,
        word_limit,
        compliant: word_limit.map_or(true, |limit| word_count <= limit),
    }
}

pub fn length_issue(check: &LengthCheck) -> Option<String> {
    match (check.compliant, check.word_limit) {
        (false, Some(SHORT_CV_WORD_LIMIT)) => {
            Some("CV exceeds 1 page for <5 years experience".to_string())
        }
        (false, Some(_)) => Some("CV exceeds 2 pages for 5+ years experience".to_string()),
        _ => None,
    }
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn is_keyword(token: &str) -> bool {
    token.chars().count() > 2 && !STOPWORDS.contains(token)
}

/// Distinct lowercased words longer than two characters.
pub fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}
