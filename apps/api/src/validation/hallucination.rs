//! Flags skills, tools, employers and dates that appear in generated sections
//! but nowhere in the candidate's own resume.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::{encode, Validator, ValidatorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Skill,
    Employer,
    Tool,
    Date,
}

impl EntityType {
    fn reason(&self) -> &'static str {
        match self {
            EntityType::Skill => "Skill not found in original CV",
            EntityType::Employer => "Employer not found in original CV",
            EntityType::Tool => "Tool not found in original CV",
            EntityType::Date => "Date not found in original CV",
        }
    }
}

struct EntityPattern {
    kind: EntityType,
    regex: Regex,
    /// Skills and tools compare case-insensitively; names and dates do not.
    fold_case: bool,
}

static ENTITY_PATTERNS: Lazy<Vec<EntityPattern>> = Lazy::new(|| {
    [
        (
            EntityType::Skill,
            r"(?i)\b(Java|Python|Selenium|Cypress|JIRA|TestRail|CI/CD|Docker|Jenkins|SQL|API|Performance|Security|DevOps)\b",
            true,
        ),
        (
            EntityType::Employer,
            r"\b(?:at|for)[ \t]+([A-Z][A-Za-z0-9&]{2,}(?:[ \t]+[A-Z][A-Za-z0-9&]*)*)",
            false,
        ),
        (
            EntityType::Tool,
            r"(?i)\b(Selenium|Cypress|JIRA|TestRail|Docker|Jenkins|Git|SQL|API)\b",
            true,
        ),
        (
            EntityType::Date,
            r"\b((?:19|20)\d{2}|Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\b",
            false,
        ),
    ]
    .into_iter()
    .map(|(kind, pattern, fold_case)| EntityPattern {
        kind,
        regex: Regex::new(pattern).expect("entity pattern is valid"),
        fold_case,
    })
    .collect()
});

impl EntityPattern {
    fn extract(&self, text: &str) -> Vec<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn normalize(&self, value: &str) -> String {
        if self.fold_case {
            value.to_lowercase()
        } else {
            value.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HallucinationIssue {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    pub section: &'static str,
    pub reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HallucinationReport {
    pub issue_count: usize,
    pub issues: Vec<HallucinationIssue>,
}

pub fn detect(resume: &str, review: &ParsedReview) -> Vec<HallucinationIssue> {
    let mut issues = Vec::new();
    let mut reported = HashSet::new();

    for pattern in ENTITY_PATTERNS.iter() {
        let source: HashSet<String> = pattern
            .extract(resume)
            .iter()
            .map(|v| pattern.normalize(v))
            .collect();

        for (kind, body) in review.sections() {
            for value in pattern.extract(body) {
                let normalized = pattern.normalize(&value);
                if source.contains(&normalized) {
                    continue;
                }
                if !reported.insert((pattern.kind, normalized, kind)) {
                    continue;
                }
                issues.push(HallucinationIssue {
                    entity_type: pattern.kind,
                    value,
                    section: kind.key(),
                    reason: pattern.kind.reason(),
                });
            }
        }
    }
    issues
}

pub struct HallucinationDetector;

impl Validator for HallucinationDetector {
    fn name(&self) -> &'static str {
        "hallucination"
    }

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        let issues = detect(&request.resume, review);
        encode(&HallucinationReport {
            issue_count: issues.len(),
            issues,
        })
    }
}
