use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Request
// ────────────────────────────────────────────────────────────────────────────

/// How far the rewritten CV may drift from the candidate's own wording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    #[default]
    Minimal,
    Balanced,
    Aggressive,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Minimal => "minimal",
            OptimizationMode::Balanced => "balanced",
            OptimizationMode::Aggressive => "aggressive",
        }
    }

    /// Instruction fragment appended to "rewrite the CV ..." in the generation prompt.
    pub fn guidance(&self) -> &'static str {
        match self {
            OptimizationMode::Minimal => {
                "with MINIMAL CHANGES - preserve the user's original voice, style, and phrasing. \
                 Only modify when absolutely necessary for ATS optimization."
            }
            OptimizationMode::Balanced => {
                "with BALANCED optimization - moderate rewriting for clarity and keyword matching \
                 while maintaining professional tone."
            }
            OptimizationMode::Aggressive => {
                "with AGGRESSIVE optimization - extensive rewriting for maximum ATS score and \
                 keyword density."
            }
        }
    }
}

impl std::str::FromStr for OptimizationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(OptimizationMode::Minimal),
            "balanced" => Ok(OptimizationMode::Balanced),
            "aggressive" => Ok(OptimizationMode::Aggressive),
            other => Err(format!("unknown optimization mode '{other}'")),
        }
    }
}

/// Raw body of `POST /api/v1/reviews` and `POST /api/v1/reviews/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewInput {
    pub resume: String,
    pub job_description: String,
    pub target_role: Option<String>,
    pub industry: Option<String>,
    pub optimization_mode: Option<OptimizationMode>,
    pub user_instructions: Option<String>,
    /// Skip the cache lookup and force a fresh generation.
    #[serde(default)]
    pub bypass_cache: bool,
}

/// A request that has passed the sanitizer. Nothing unsanitized reaches a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub resume: String,
    pub job_description: String,
    pub target_role: Option<String>,
    pub industry: Option<String>,
    pub optimization_mode: OptimizationMode,
    pub user_instructions: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    AtsAnalysis,
    BehaviouralQuestions,
    TechnicalQuestions,
    SkillsGap,
    OptimizedCv,
    CoverLetter,
    SixSecondTest,
}

impl SectionKind {
    /// All sections in boundary-number order.
    pub const ALL: [SectionKind; 7] = [
        SectionKind::AtsAnalysis,
        SectionKind::BehaviouralQuestions,
        SectionKind::TechnicalQuestions,
        SectionKind::SkillsGap,
        SectionKind::OptimizedCv,
        SectionKind::CoverLetter,
        SectionKind::SixSecondTest,
    ];

    pub fn number(&self) -> u8 {
        match self {
            SectionKind::AtsAnalysis => 1,
            SectionKind::BehaviouralQuestions => 2,
            SectionKind::TechnicalQuestions => 3,
            SectionKind::SkillsGap => 4,
            SectionKind::OptimizedCv => 5,
            SectionKind::CoverLetter => 6,
            SectionKind::SixSecondTest => 7,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.number() == number)
    }

    pub fn key(&self) -> &'static str {
        match self {
            SectionKind::AtsAnalysis => "ats_analysis",
            SectionKind::BehaviouralQuestions => "behavioural_questions",
            SectionKind::TechnicalQuestions => "technical_questions",
            SectionKind::SkillsGap => "skills_gap",
            SectionKind::OptimizedCv => "optimized_cv",
            SectionKind::CoverLetter => "cover_letter",
            SectionKind::SixSecondTest => "six_second_test",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SectionKind::AtsAnalysis => "ATS Optimization Analysis",
            SectionKind::BehaviouralQuestions => "Behavioral Interview Questions",
            SectionKind::TechnicalQuestions => "Technical Interview Questions",
            SectionKind::SkillsGap => "Skills Gap & Action Plan",
            SectionKind::OptimizedCv => "Optimized CV",
            SectionKind::CoverLetter => "Cover Letter",
            SectionKind::SixSecondTest => "Six-Second Recruiter Test",
        }
    }
}

/// The seven text blocks extracted from one generation. Empty string = not found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub ats_analysis: String,
    pub behavioural_questions: String,
    pub technical_questions: String,
    pub skills_gap: String,
    pub optimized_cv: String,
    pub cover_letter: String,
    pub six_second_test: String,
}

impl ParsedReview {
    pub fn section(&self, kind: SectionKind) -> &str {
        match kind {
            SectionKind::AtsAnalysis => &self.ats_analysis,
            SectionKind::BehaviouralQuestions => &self.behavioural_questions,
            SectionKind::TechnicalQuestions => &self.technical_questions,
            SectionKind::SkillsGap => &self.skills_gap,
            SectionKind::OptimizedCv => &self.optimized_cv,
            SectionKind::CoverLetter => &self.cover_letter,
            SectionKind::SixSecondTest => &self.six_second_test,
        }
    }

    pub fn section_mut(&mut self, kind: SectionKind) -> &mut String {
        match kind {
            SectionKind::AtsAnalysis => &mut self.ats_analysis,
            SectionKind::BehaviouralQuestions => &mut self.behavioural_questions,
            SectionKind::TechnicalQuestions => &mut self.technical_questions,
            SectionKind::SkillsGap => &mut self.skills_gap,
            SectionKind::OptimizedCv => &mut self.optimized_cv,
            SectionKind::CoverLetter => &mut self.cover_letter,
            SectionKind::SixSecondTest => &mut self.six_second_test,
        }
    }

    /// Iterates `(kind, body)` in boundary-number order.
    pub fn sections(&self) -> impl Iterator<Item = (SectionKind, &str)> + '_ {
        SectionKind::ALL.iter().map(move |k| (*k, self.section(*k)))
    }

    pub fn missing_sections(&self) -> Vec<SectionKind> {
        self.sections()
            .filter(|(_, body)| body.trim().is_empty())
            .map(|(kind, _)| kind)
            .collect()
    }

    /// Returns a copy with `f` applied to every section body.
    pub fn map_sections(&self, f: impl Fn(&str) -> String) -> ParsedReview {
        let mut out = ParsedReview::default();
        for (kind, body) in self.sections() {
            *out.section_mut(kind) = f(body);
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

/// Validator name → that validator's result object.
pub type ValidationReport = Map<String, Value>;

/// Final result of one review, shared by the single-shot response and the `parsed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Identifier of the history record, absent when persistence failed.
    pub id: Option<Uuid>,
    pub sections: ParsedReview,
    pub validation: ValidationReport,
    pub provider: String,
    pub cached: bool,
    pub duration_ms: u64,
    pub optimization_mode: OptimizationMode,
    pub input_warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}
