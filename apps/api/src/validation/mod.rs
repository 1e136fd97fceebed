//! Validation Pipeline: an ordered list of independent checks over a parsed review.
//!
//! Each validator sees only the sanitized request and the parsed sections and
//! returns one JSON object; the pipeline files it under the validator's name.
//! A failing validator degrades its own entry and never aborts the others.

pub mod ai_text;
pub mod ats;
pub mod formatting;
pub mod hallucination;
pub mod keywords;
pub mod similarity;
pub mod structure;
pub mod text;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::models::review::{ParsedReview, ReviewRequest, SectionKind, ValidationReport};

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("{} section is empty", .0.key())]
    EmptySection(SectionKind),

    #[error("could not encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Validator: Send + Sync {
    /// Key under which the result is filed in the report.
    fn name(&self) -> &'static str;

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview)
        -> Result<Value, ValidatorError>;
}

/// The generated CV, or an error when the model produced none.
pub(crate) fn optimized_cv(review: &ParsedReview) -> Result<&str, ValidatorError> {
    let cv = review.section(SectionKind::OptimizedCv);
    if cv.trim().is_empty() {
        return Err(ValidatorError::EmptySection(SectionKind::OptimizedCv));
    }
    Ok(cv)
}

pub(crate) fn encode<T: Serialize>(result: &T) -> Result<Value, ValidatorError> {
    Ok(serde_json::to_value(result)?)
}

pub struct ValidationPipeline {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidationPipeline {
    pub fn new(validators: Vec<Box<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// Hallucination, ATS, keywords, structure, similarity, AI-text, formatting.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Box::new(hallucination::HallucinationDetector),
            Box::new(ats::AtsSimulator),
            Box::new(keywords::KeywordMatcher),
            Box::new(structure::StructureValidator),
            Box::new(similarity::SemanticSimilarity),
            Box::new(ai_text::AiTextDetector),
            Box::new(formatting::FormattingEnforcer),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Runs every validator in order and merges the results; a later entry
    /// under the same name replaces an earlier one.
    pub fn run(&self, request: &ReviewRequest, review: &ParsedReview) -> ValidationReport {
        let mut report = ValidationReport::new();
        for validator in &self.validators {
            let name = validator.name();
            let entry = match validator.validate(request, review) {
                Ok(value) => value,
                Err(e) => {
                    warn!(validator = name, "Validator degraded: {e}");
                    json!({ "degraded": true, "error": e.to_string() })
                }
            };
            if report.insert(name.to_string(), entry).is_some() {
                warn!(validator = name, "Duplicate validator key; keeping the later result");
            }
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::review::{OptimizationMode, ParsedReview, ReviewRequest};

    pub const RESUME: &str = "Jane Tester\njane@example.com\n\
        QA engineer with 4 years of experience at Acme Payments since 2019.\n\
        Built Selenium and Python regression suites, ran SQL checks and tracked defects in JIRA.\n\
        Mentored two junior testers and cut release regressions by 30 percent.";

    pub const JOB: &str = "We are hiring a QA automation engineer. The automation engineer owns \
        Selenium regression suites, Python tooling, and release quality. Automation experience \
        with Docker pipelines is a plus.";

    pub const CV: &str = "Contact\njane@example.com\n\n\
        Summary\nQA engineer with 4 years of experience building Selenium and Python regression suites.\n\n\
        Skills\n- Selenium\n- Python\n- SQL\n- JIRA\n\n\
        Experience\nQA Engineer at Acme Payments, 2019 to present.\n\
        - Built Selenium and Python regression suites for release quality.\n\
        - Cut release regressions by 30 percent.\n\n\
        Education\nBSc Computer Science";

    pub fn request() -> ReviewRequest {
        ReviewRequest {
            resume: RESUME.to_string(),
            job_description: JOB.to_string(),
            target_role: Some("QA Automation Engineer".to_string()),
            industry: None,
            optimization_mode: OptimizationMode::Minimal,
            user_instructions: None,
        }
    }

    pub fn review_with_cv(cv: &str) -> ParsedReview {
        ParsedReview {
            optimized_cv: cv.to_string(),
            ..ParsedReview::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    struct Fixed(&'static str, Value);

    impl Validator for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn validate(&self, _: &ReviewRequest, _: &ParsedReview) -> Result<Value, ValidatorError> {
            Ok(self.1.clone())
        }
    }

    struct Broken;

    impl Validator for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn validate(&self, _: &ReviewRequest, _: &ParsedReview) -> Result<Value, ValidatorError> {
            Err(ValidatorError::EmptySection(SectionKind::CoverLetter))
        }
    }

    #[test]
    fn test_empty_pipeline_yields_empty_report() {
        let report = ValidationPipeline::new(vec![]).run(&request(), &review_with_cv(CV));
        assert!(report.is_empty());
    }

    #[test]
    fn test_report_has_one_key_per_validator() {
        let pipeline = ValidationPipeline::new(vec![
            Box::new(Fixed("a", json!(1))),
            Box::new(Fixed("b", json!(2))),
            Box::new(Fixed("c", json!(3))),
        ]);
        let report = pipeline.run(&request(), &review_with_cv(CV));
        assert_eq!(report.len(), 3);
        assert_eq!(report["b"], json!(2));
    }

    #[test]
    fn test_later_validator_wins_on_collision() {
        let pipeline = ValidationPipeline::new(vec![
            Box::new(Fixed("same", json!("first"))),
            Box::new(Fixed("same", json!("second"))),
        ]);
        let report = pipeline.run(&request(), &review_with_cv(CV));
        assert_eq!(report.len(), 1);
        assert_eq!(report["same"], json!("second"));
    }

    #[test]
    fn test_failing_validator_degrades_only_itself() {
        let pipeline = ValidationPipeline::new(vec![
            Box::new(Broken),
            Box::new(Fixed("ok", json!({"fine": true}))),
        ]);
        let report = pipeline.run(&request(), &review_with_cv(CV));
        assert_eq!(report["broken"]["degraded"], json!(true));
        assert_eq!(report["broken"]["error"], json!("cover_letter section is empty"));
        assert_eq!(report["ok"]["fine"], json!(true));
    }

    #[test]
    fn test_default_chain_reports_every_validator() {
        let pipeline = ValidationPipeline::with_defaults();
        let report = pipeline.run(&request(), &review_with_cv(CV));
        assert_eq!(report.len(), 7);
        for name in pipeline.names() {
            let entry = &report[name];
            assert!(entry.get("degraded").is_none(), "{name} degraded: {entry}");
        }
    }

    #[test]
    fn test_default_chain_degrades_cv_checks_without_cv() {
        let report = ValidationPipeline::with_defaults().run(&request(), &ParsedReview::default());
        assert_eq!(report.len(), 7);
        assert_eq!(report["ats_simulation"]["degraded"], json!(true));
        assert!(report["hallucination"].get("degraded").is_none());
    }
}
