//! Input Sanitizer: cleans caller text before it reaches a prompt, and
//! provider text before it reaches a caller. All functions are pure.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::AppError;
use crate::models::review::{ReviewInput, ReviewRequest};

pub const MAX_INPUT_CHARS: usize = 10_000;
pub const MIN_RESUME_CHARS: usize = 100;
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 30;
pub const MAX_INSTRUCTIONS_CHARS: usize = 500;
pub const MAX_LABEL_CHARS: usize = 200;

/// Share of the input that adversarial stripping may remove before the input is rejected.
const SUSPICIOUS_REMOVAL_RATIO: f64 = 0.5;

/// Instruction-override, role-switch and chat-control markers.
static INJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ignore\s+previous\s+instructions|ignore\s+all\s+previous|disregard\s+previous|forget\s+previous|new\s+instructions:|system\s*:|assistant\s*:|\[INST\]|\[/INST\]|<\|im_start\|>|<\|im_end\|>",
    )
    .expect("injection pattern is valid")
});

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{5,}").expect("newline pattern is valid"));

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script pattern is valid")
});
static EVENT_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("handler pattern is valid"));
static JS_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("js uri pattern is valid"));
static DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdata:[^,\s]*,").expect("data uri pattern is valid"));

static PII_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("email address", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        (
            "phone number",
            r"(?:\+\d{1,3}[\s.-]?)?\(?\d{3,4}\)?[\s.-]?\d{3}[\s.-]?\d{3,4}\b",
        ),
        ("social security number", r"\b\d{3}-\d{2}-\d{4}\b"),
        (
            "street address",
            r"(?i)\b\d{1,5}\s+(?:[a-z]+\s+){1,3}(?:street|st|avenue|ave|road|rd|lane|ln|drive|dr|boulevard|blvd|close|way)\b",
        ),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("pii pattern is valid")))
    .collect()
});

/// Control bytes, injection markers and newline floods removed. No truncation.
fn strip_adversarial(text: &str) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect();

    // Removing one marker can splice together another one.
    loop {
        let next = INJECTION.replace_all(&cleaned, "").into_owned();
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    EXCESS_NEWLINES.replace_all(&cleaned, "\n\n\n\n").into_owned()
}

/// Cleans caller-supplied text. `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(text: &str) -> String {
    let cleaned = strip_adversarial(text);
    truncate_chars(&cleaned, MAX_INPUT_CHARS).trim().to_string()
}

/// Sanitizes `text` and enforces presence, minimum length and a bound on how
/// much adversarial content was stripped. Returns the sanitized text.
pub fn validate(text: &str, min_length: usize, field_name: &str) -> Result<String, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::Validation(format!("{field_name} is required")));
    }

    let sanitized = sanitize(text);
    if sanitized.chars().count() < min_length {
        return Err(AppError::Validation(format!(
            "{field_name} must be at least {min_length} characters"
        )));
    }

    let original_len = text.chars().count();
    let stripped_len = strip_adversarial(text).chars().count();
    let removed = original_len.saturating_sub(stripped_len) as f64 / original_len as f64;
    if removed > SUSPICIOUS_REMOVAL_RATIO {
        return Err(AppError::Validation(format!(
            "{field_name} contains suspicious content"
        )));
    }

    Ok(sanitized)
}

/// Makes provider-generated text safe to render: active content removed, then HTML-escaped.
pub fn escape_for_display(text: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    let text = JS_URI.replace_all(&text, "");
    let text = DATA_URI.replace_all(&text, "");

    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Advisory warnings for personal data found in a resume. Never blocks a request.
pub fn detect_pii(text: &str) -> Vec<String> {
    PII_PATTERNS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(label, _)| format!("Resume appears to contain a {label}"))
        .collect()
}

/// Sanitizes every field of a raw request body into a [`ReviewRequest`].
pub fn prepare_request(input: &ReviewInput) -> Result<ReviewRequest, AppError> {
    let resume = validate(&input.resume, MIN_RESUME_CHARS, "resume")?;
    let job_description = validate(
        &input.job_description,
        MIN_JOB_DESCRIPTION_CHARS,
        "job_description",
    )?;

    let user_instructions = match input.user_instructions.as_deref().map(sanitize) {
        Some(text) if text.chars().count() > MAX_INSTRUCTIONS_CHARS => {
            return Err(AppError::Validation(format!(
                "user_instructions must be at most {MAX_INSTRUCTIONS_CHARS} characters"
            )));
        }
        Some(text) if !text.is_empty() => Some(text),
        _ => None,
    };

    Ok(ReviewRequest {
        resume,
        job_description,
        target_role: sanitize_label(input.target_role.as_deref()),
        industry: sanitize_label(input.industry.as_deref()),
        optimization_mode: input.optimization_mode.unwrap_or_default(),
        user_instructions,
    })
}

fn sanitize_label(label: Option<&str>) -> Option<String> {
    let cleaned = sanitize(label?);
    let cleaned = truncate_chars(&cleaned, MAX_LABEL_CHARS).trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
