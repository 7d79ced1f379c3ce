//! Structured extraction from raw model output
//!
//! The model is prompted for a four-label block but routinely echoes
//! the prompt back, emits the unfilled label skeleton, or rambles in
//! free text. This module is the defense: strip the echoes, drop the
//! skeleton, then either parse the labels verbatim, fall back to the
//! cleaned free text, or reject outright. Callers decide what a
//! rejection means; nothing here invents a finding.

use once_cell::sync::Lazy;
use regex::Regex;
use sv_common::events::RiskLevel;

/// Keywords scanned against the raw output for feature tagging
const FEATURE_KEYWORDS: &[&str] = &[
    "erythema",
    "ulcer",
    "polyp",
    "inflammation",
    "bleeding",
    "lesion",
];

/// Prompt vocabulary that disqualifies a finding value
const PROMPT_VOCABULARY: &[&str] = &["medgemma", "medvisor", "analyze", "endoscopist"];

/// Fallback findings keep at most this many characters of free text
const FALLBACK_MAX_CHARS: usize = 500;

/// Minimum cleaned length for the free-text fallback
const FALLBACK_MIN_CHARS: usize = 15;

// Prompt-echo patterns. Each one swallows text from its anchor up to
// the next structured label (or end of input); the label itself is
// re-emitted via the capture since the regex engine has no lookahead.
static ECHO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    const STOP: &str = "(Finding:|Location:|Risk Level:|$)";
    [
        r"(?is)You are Med\w+.*?",
        r"(?is)Analyze this.*?",
        r"(?is)Return ONLY structured output.*?",
        r"(?is)\[System\].*?",
        r"(?is)Do NOT provide.*?",
        r"(?is)Be cautious.*?",
        r"(?is)assisting an endoscopist.*?",
        r"(?is)<start_of_image>.*?",
    ]
    .iter()
    .map(|prefix| Regex::new(&format!("{}{}", prefix, STOP)).unwrap())
    .collect()
});

// Unfilled label skeleton, multi-line and inline forms
static EMPTY_SKELETON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)Finding:\s*\n\s*Location:\s*\n\s*Risk Level \(Low/Medium/High\):\s*\n\s*Suggested Next Step:\s*\n",
    )
    .unwrap()
});
static EMPTY_SKELETON_INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^Finding:\s*Location:\s*Risk Level \(Low/Medium/High\):\s*Suggested Next Step:\s*",
    )
    .unwrap()
});

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

// Structured block. Tolerates "Risk:", "Risk Level:", and the full
// "Risk Level (Low/Medium/High):" form, and both "Suggested Next Step"
// and "Suggested Action".
static STRUCTURED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)Finding:\s*(.*?)\s*\n\s*Location:\s*(.*?)\s*\n\s*Risk(?:\s+Level)?(?:\s*\(Low/Medium/High\))?:\s*(.*?)\s*\n\s*Suggested (?:Next Step|Action):\s*(.*?)(?:\n|$)",
    )
    .unwrap()
});

// Clarification block from the follow-up question prompt
static CLARIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)Clarification:\s*(.*?)\s*\n\s*Confidence:\s*(.*?)\s*\n\s*Suggested Action:\s*(.*?)(?:\n|$)",
    )
    .unwrap()
});

/// A finding recovered from model output
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFinding {
    pub finding: String,
    pub location: String,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub suggested_action: String,
    pub detected_features: Vec<String>,
    /// True when the four-label block parsed; false for the free-text
    /// fallback
    pub structured: bool,
}

/// Extraction outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Finding(ExtractedFinding),
    /// Nothing usable survived cleaning. The caller chooses the
    /// consequence (placeholder finding, skipped timeline entry).
    Rejected,
}

/// Parsed answer to a clarification question
#[derive(Debug, Clone, PartialEq)]
pub struct Clarification {
    pub clarification: String,
    pub confidence: String,
    pub suggested_action: String,
}

/// Strip prompt echoes and the unfilled skeleton from raw model output
pub fn clean_model_output(raw: &str) -> String {
    let mut cleaned = raw.to_string();

    for pattern in ECHO_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "$1").into_owned();
    }

    cleaned = EMPTY_SKELETON.replace_all(&cleaned, "").into_owned();
    cleaned = EMPTY_SKELETON_INLINE.replace(&cleaned, "").into_owned();
    cleaned = BLANK_LINES.replace_all(&cleaned, "\n").into_owned();

    cleaned.trim().to_string()
}

/// Scan raw output for feature keywords
pub fn detect_features(raw: &str) -> Vec<String> {
    let lower = raw.to_lowercase();
    FEATURE_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(**kw))
        .map(|kw| kw.to_string())
        .collect()
}

fn finding_is_valid(finding: &str) -> bool {
    if finding.len() < 3 {
        return false;
    }
    let lower = finding.to_lowercase();
    !PROMPT_VOCABULARY.iter().any(|word| lower.contains(word))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Extract a finding from raw model output
///
/// Structured parse first; free-text fallback when the labels are
/// missing or their content fails validation; rejection when the
/// cleaned text is too short to mean anything. Fallback findings are
/// always graded low risk at the low-risk default confidence, since
/// free text gives no basis for escalation.
pub fn extract(raw: &str) -> Extraction {
    let cleaned = clean_model_output(raw);

    if let Some(caps) = STRUCTURED.captures(&cleaned) {
        let finding = caps[1].trim().to_string();
        let location = caps[2].trim().to_string();
        let risk_text = caps[3].trim().to_string();
        let action = caps[4].trim().to_string();

        if finding_is_valid(&finding) {
            let risk_level = RiskLevel::parse_lenient(&risk_text);
            return Extraction::Finding(ExtractedFinding {
                finding,
                location,
                risk_level,
                confidence: risk_level.default_confidence(),
                suggested_action: action,
                detected_features: detect_features(raw),
                structured: true,
            });
        }
    }

    // A label skeleton that dodged removal (no trailing newline) must
    // not leak into the fallback as if it were prose
    if cleaned.starts_with("Finding:\nLocation:") {
        return Extraction::Rejected;
    }

    if cleaned.chars().count() > FALLBACK_MIN_CHARS {
        return Extraction::Finding(ExtractedFinding {
            finding: truncate_chars(&cleaned, FALLBACK_MAX_CHARS),
            location: "Unknown".to_string(),
            risk_level: RiskLevel::Low,
            confidence: RiskLevel::Low.default_confidence(),
            suggested_action: "Continue inspection".to_string(),
            detected_features: detect_features(raw),
            structured: false,
        });
    }

    Extraction::Rejected
}

/// Parse a clarification answer; None when the labels are absent
pub fn extract_clarification(raw: &str) -> Option<Clarification> {
    let cleaned = clean_model_output(raw);
    CLARIFICATION.captures(&cleaned).map(|caps| Clarification {
        clarification: caps[1].trim().to_string(),
        confidence: caps[2].trim().to_string(),
        suggested_action: caps[3].trim().to_string(),
    })
}
