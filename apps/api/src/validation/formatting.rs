use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text;
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

const MAX_AVERAGE_SENTENCE_WORDS: f64 = 30.0;

/// House formatting rules. Any error makes the CV non-compliant; warnings are advisory.
#[derive(Debug, Serialize)]
pub struct FormattingResult {
    pub compliant: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn enforce(resume: &str, cv: &str) -> FormattingResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let positions = text::header_positions(cv);
    if positions.iter().any(Option::is_none) {
        errors.push(
            "Missing one or more required sections (Contact, Summary, Skills, Experience, Education)"
                .to_string(),
        );
    }
    if !text::headers_in_order(&positions) {
        errors.push("Section order is incorrect".to_string());
    }
    if text::has_table_markup(cv) {
        errors.push("Tables or columns detected (must be single-column layout)".to_string());
    }
    if text::has_graphics(cv) {
        errors.push("Graphics/images detected (not allowed)".to_string());
    }

    let banned = text::find_banned_phrases(cv);
    if !banned.is_empty() {
        errors.push(format!("Banned phrases detected: {}", banned.join(", ")));
    }

    if let Some(issue) = text::length_issue(&text::check_length(resume, cv)) {
        errors.push(issue);
    }

    if !text::uses_standard_fonts(cv) {
        warnings.push(
            "Non-standard font detected (should use Arial, Calibri, or Times New Roman)".to_string(),
        );
    }
    if text::average_sentence_length(cv) > MAX_AVERAGE_SENTENCE_WORDS {
        warnings.push("Sentences are too long; revise for conciseness".to_string());
    }

    FormattingResult {
        compliant: errors.is_empty(),
        errors,
        warnings,
    }
}

pub struct FormattingEnforcer;

impl Validator for FormattingEnforcer {
    fn name(&self) -> &'static str {
        "formatting"
    }

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        encode(&enforce(&request.resume, optimized_cv(review)?))
    }
}
