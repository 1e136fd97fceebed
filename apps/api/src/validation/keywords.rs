use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text::{is_keyword, tokenize};
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

const TOP_KEYWORDS: usize = 20;

#[derive(Debug, Serialize)]
pub struct KeywordMatch {
    pub top_keywords: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub missing_keywords: Vec<String>,
    /// matched / top, 0 when the job description has no keywords.
    pub keyword_density: f64,
}

/// Most frequent job-description terms; ties keep first-appearance order.
pub fn top_keywords(job_description: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in tokenize(job_description)
        .into_iter()
        .filter(|t| is_keyword(t))
        .enumerate()
    {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(t, _, _)| t).collect()
}

pub fn match_keywords(job_description: &str, cv: &str) -> KeywordMatch {
    let top = top_keywords(job_description, TOP_KEYWORDS);
    let cv_tokens: HashSet<String> = tokenize(cv).into_iter().collect();

    let (matched, missing): (Vec<String>, Vec<String>) =
        top.iter().cloned().partition(|k| cv_tokens.contains(k));

    let keyword_density = if top.is_empty() {
        0.0
    } else {
        matched.len() as f64 / top.len() as f64
    };

    KeywordMatch {
        top_keywords: top,
        matched_keywords: matched,
        missing_keywords: missing,
        keyword_density,
    }
}

pub struct KeywordMatcher;

impl Validator for KeywordMatcher {
    fn name(&self) -> &'static str {
        "keyword_match"
    }

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        encode(&match_keywords(&request.job_description, optimized_cv(review)?))
    }
}
