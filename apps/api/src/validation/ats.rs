use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text::{self, REQUIRED_HEADERS};
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

/// How an applicant tracking system would likely treat the generated CV.
#[derive(Debug, Serialize)]
pub struct AtsSimulation {
    pub single_column: bool,
    pub has_standard_sections: bool,
    pub has_no_tables: bool,
    pub has_no_graphics: bool,
    pub uses_standard_fonts: bool,
    pub uses_bullets: bool,
    pub length_compliant: bool,
    pub word_count: usize,
    pub word_limit: Option<usize>,
    pub issues: Vec<String>,
}

pub fn simulate(resume: &str, cv: &str) -> AtsSimulation {
    let mut issues = Vec::new();

    let has_no_tables = !text::has_table_markup(cv);
    if !has_no_tables {
        issues.push("Tables or columns detected (not ATS-friendly)".to_string());
    }

    let has_no_graphics = !text::has_graphics(cv);
    if !has_no_graphics {
        issues.push("Graphics/images detected (not ATS-friendly)".to_string());
    }

    let uses_bullets = text::uses_bullets(cv);
    if !uses_bullets {
        issues.push("No bullet points detected (ATS prefers clear bullets)".to_string());
    }

    let lower = cv.to_lowercase();
    let has_standard_sections = REQUIRED_HEADERS
        .iter()
        .all(|h| lower.contains(&h.to_lowercase()));
    if !has_standard_sections {
        issues.push(
            "Missing one or more standard sections (Contact, Summary, Skills, Experience, Education)"
                .to_string(),
        );
    }

    let length = text::check_length(resume, cv);
    if let Some(issue) = text::length_issue(&length) {
        issues.push(issue);
    }

    AtsSimulation {
        single_column: has_no_tables,
        has_standard_sections,
        has_no_tables,
        has_no_graphics,
        uses_standard_fonts: text::uses_standard_fonts(cv),
        uses_bullets,
        length_compliant: length.compliant,
        word_count: length.word_count,
        word_limit: length.word_limit,
        issues,
    }
}

pub struct AtsSimulator;

impl Validator for AtsSimulator {
    fn name(&self) -> &'static str {
        "ats_simulation"
    }

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        encode(&simulate(&request.resume, optimized_cv(review)?))
    }
}
