// Prompt constants for review generation.
// The section markers here are the boundaries the parser splits on; keep them in sync.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::llm_client::Prompt;
use crate::models::review::ReviewRequest;

/// System prompt shared by both providers.
pub const REVIEW_SYSTEM: &str = "You are a UK-based Career Coach and Senior Talent Acquisition \
    Specialist for the Technology sector. You assess CVs against job descriptions, prepare \
    interview content and rewrite CVs. Use British English throughout and avoid AI-sounding \
    or robotic phrasing. Never invent experience, employers, tools or dates.";

/// Review prompt template. Replace every `{placeholder}` before sending.
pub const REVIEW_PROMPT_TEMPLATE: &str = r#"You are reviewing a CV for a role{role_context}{industry_context}, specialising in the {domain} domain.

Your task is to assess the CV against the Job Description, identify gaps, prepare interview content, and rewrite the CV {mode_guidance} Use British English throughout.{user_instructions}

RESUME/CV:
{resume}

TARGET JOB DESCRIPTION:
{job_description}

QUALITY RULES (NON-NEGOTIABLE):
- British English only (specialise, programme, organisation, whilst)
- Avoid AI-style filler, generic platitudes, or vague praise
- Do not invent experience, employers, or tools. Use [Bracketed Placeholders] when missing
- Keep statements grounded in the CV/JD with concrete evidence
- Medium length: ~300-450 words per section unless otherwise specified

OPTIMISATION PRINCIPLES:
- Job-Specific Tailoring: every suggestion must be tied to the target job description
- Keyword Density: match 80%+ of critical keywords from the job description
- ATS-Friendly Formatting: single column, clear headers, no tables or graphics, standard fonts
- Length: one page for <5 years experience, two pages for 5+ years (STRICT)
- No Fluff: remove generic statements, focus on quantifiable achievements with metrics
- Hallucination Prevention: never add skills, tools, or experiences not in the original CV

BANNED WORDS/PHRASES:
"Delve," "landscape," "tapestry," "symphony," "game-changer," "leverage," "spearhead," "paramount," "underscores," "in today's fast-paced world," "unlock your potential," "robust," "dynamic," "passionate"

OUTPUT FORMAT (MUST FOLLOW EXACTLY):
===== SECTION 1: STRATEGIC ROLE ANALYSIS & ATS OPTIMISATION =====
(Target Role Class, Alignment Assessment, Critical Keywords Found/Missing, Keyword Density Score X/10, ATS Audit with Pass/Fail checks)

===== SECTION 2: BEHAVIOURAL & SOFT SKILLS INTERVIEW QUESTIONS =====
(EXACTLY 5 questions, each with Target Competency, Why This Matters, and a STAR Response Guide)

===== SECTION 3: DOMAIN-SPECIFIC TECHNICAL INTERVIEW QUESTIONS =====
(EXACTLY 5 questions, each with Domain Focus, Job Requirement Link, Senior Answer Outline, and CV Evidence)

===== SECTION 4: SKILLS GAP & ACTION PLAN =====
(4-6 critical gaps, each with Gap, Current CV Status, Evidence Missing, Action, Timeline, and Priority)

===== SECTION 5: THE REWRITTEN UK CV =====
(Headers in this order: Contact, Summary, Skills, Experience, Education. Single column, plain bullets, no tables or graphics. NO FABRICATION.)

===== SECTION 6: THE UK COVER LETTER =====
(Professional, tailored to the job description, 3-4 paragraphs)

===== SECTION 7: SIX-SECOND RECRUITER TEST =====
(What a recruiter sees in the first six seconds of the rewritten CV, and what to move up)

Generate all 7 sections using the exact headings above."#;

const DEFAULT_DOMAIN: &str = "Software Testing and Quality Engineering";

/// Placeholders are filled in one pass over the template, so caller text that
/// happens to contain `{resume}` is never expanded.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Builds the provider prompt from a sanitized request.
pub fn build_review_prompt(request: &ReviewRequest) -> Prompt {
    let role_context = request
        .target_role
        .as_deref()
        .map(|role| format!(" with deep expertise in {role} roles"))
        .unwrap_or_default();
    let industry_context = request
        .industry
        .as_deref()
        .map(|industry| format!(" within the {industry} industry"))
        .unwrap_or_default();
    let user_instructions = request
        .user_instructions
        .as_deref()
        .map(|text| {
            format!(
                "\n\nUSER'S CUSTOM INSTRUCTIONS:\n{text}\n(Follow these instructions when optimising the CV)"
            )
        })
        .unwrap_or_default();

    let domain = request.target_role.as_deref().unwrap_or(DEFAULT_DOMAIN);
    let user = PLACEHOLDER.replace_all(REVIEW_PROMPT_TEMPLATE, |caps: &Captures| {
        match &caps[1] {
            "role_context" => role_context.as_str(),
            "industry_context" => industry_context.as_str(),
            "domain" => domain,
            "mode_guidance" => request.optimization_mode.guidance(),
            "user_instructions" => user_instructions.as_str(),
            "job_description" => request.job_description.as_str(),
            "resume" => request.resume.as_str(),
            _ => caps.get(0).map_or("", |m| m.as_str()),
        }
        .to_string()
    });

    Prompt {
        system: REVIEW_SYSTEM.to_string(),
        user: user.into_owned(),
    }
}
