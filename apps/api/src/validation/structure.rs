use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text;
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

#[derive(Debug, Serialize)]
pub struct StructureValidation {
    pub correct_order: bool,
    pub all_headers_present: bool,
    pub header_issues: Vec<String>,
    /// Required headers in the order they appear in the CV.
    pub section_order: Vec<&'static str>,
}

pub fn check_structure(cv: &str) -> StructureValidation {
    let positions = text::header_positions(cv);
    let all_headers_present = positions.iter().all(Option::is_some);
    let correct_order = text::headers_in_order(&positions);

    let mut header_issues = Vec::new();
    if !all_headers_present {
        header_issues.push("Missing one or more required headers".to_string());
    }
    if !correct_order {
        header_issues.push("Section order is incorrect".to_string());
    }

    StructureValidation {
        correct_order,
        all_headers_present,
        header_issues,
        section_order: text::header_order(&positions),
    }
}

pub struct StructureValidator;

impl Validator for StructureValidator {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn validate(&self, _request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        encode(&check_structure(optimized_cv(review)?))
    }
}
