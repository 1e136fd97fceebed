use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text::{find_banned_phrases, sentences, word_count};
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

const LONG_SENTENCE_WORDS: usize = 25;
const PHRASE_WEIGHT: f64 = 0.2;
const WARN_SCORE: f64 = 0.5;

#[derive(Debug, Serialize)]
pub struct AiTextDetection {
    /// 0..=1, higher reads more machine-written.
    pub ai_score: f64,
    pub flagged_phrases: Vec<&'static str>,
    pub long_sentences: usize,
    pub sentence_count: usize,
    pub warnings: Vec<String>,
}

pub fn score(cv: &str) -> AiTextDetection {
    let flagged_phrases = find_banned_phrases(cv);
    let sentences = sentences(cv);
    let long_sentences = sentences
        .iter()
        .filter(|s| word_count(s) > LONG_SENTENCE_WORDS)
        .count();
    let long_ratio = if sentences.is_empty() {
        0.0
    } else {
        long_sentences as f64 / sentences.len() as f64
    };
    let ai_score = (flagged_phrases.len() as f64 * PHRASE_WEIGHT + long_ratio).min(1.0);

    let mut warnings = Vec::new();
    if ai_score > WARN_SCORE {
        warnings.push(
            "CV contains language patterns typical of AI-generated text. Consider revising for a more personal tone."
                .to_string(),
        );
    }
    if !flagged_phrases.is_empty() {
        warnings.push(format!("Flagged phrases: {}", flagged_phrases.join(", ")));
    }

    AiTextDetection {
        ai_score,
        flagged_phrases,
        long_sentences,
        sentence_count: sentences.len(),
        warnings,
    }
}

pub struct AiTextDetector;

impl Validator for AiTextDetector {
    fn name(&self) -> &'static str {
        "ai_text_detection"
    }

    fn validate(&self, _request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        encode(&score(optimized_cv(review)?))
    }
}
