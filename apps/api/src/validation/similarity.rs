use serde::Serialize;
use serde_json::Value;

use crate::models::review::{ParsedReview, ReviewRequest};
use crate::validation::text::word_set;
use crate::validation::{encode, optimized_cv, Validator, ValidatorError};

const MIN_SIMILARITY: f64 = 0.5;

#[derive(Debug, Serialize)]
pub struct SimilarityResult {
    pub similarity_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Jaccard overlap of the two texts' word sets.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

pub struct SemanticSimilarity;

impl Validator for SemanticSimilarity {
    fn name(&self) -> &'static str {
        "semantic_similarity"
    }

    fn validate(&self, request: &ReviewRequest, review: &ParsedReview) -> Result<Value, ValidatorError> {
        let similarity_score = jaccard(&request.resume, optimized_cv(review)?);
        let warning = (similarity_score < MIN_SIMILARITY)
            .then(|| "Optimized CV is semantically very different from original".to_string());
        encode(&SimilarityResult {
            similarity_score,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::fixtures::*;

    #[test]
    fn test_jaccard_bounds() {
        assert_eq!(jaccard("alpha beta gamma", "alpha beta gamma"), 1.0);
        assert_eq!(jaccard("alpha beta", "delta omega"), 0.0);
        assert_eq!(jaccard("", ""), 0.0);
        assert!((jaccard("alpha beta gamma", "alpha beta delta") - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rewritten_cv_warns_when_far_from_resume() {
        let review = review_with_cv("Completely unrelated marketing copy about yachts and sailing.");
        let value = SemanticSimilarity.validate(&request(), &review).unwrap();
        assert!(value["similarity_score"].as_f64().unwrap() < 0.5);
        assert!(value["warning"].is_string());
    }

    #[test]
    fn test_close_rewrite_has_no_warning() {
        let review = review_with_cv(RESUME);
        let value = SemanticSimilarity.validate(&request(), &review).unwrap();
        assert_eq!(value["similarity_score"], 1.0);
        assert!(value.get("warning").is_none());
    }
}
