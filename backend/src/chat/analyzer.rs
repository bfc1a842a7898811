//! Heuristic message classifier for contact-sharing and scam attempts
//!
//! Contact-sharing categories only block in `PreEscrow`. Scam patterns block in
//! every mode. The strict profile, applied to restricted users, additionally
//! catches partial numbers and indirect requests for contact details.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::trust_gate::FilterMode;

/// Longest message snippet kept in a violation record
pub const SNIPPET_MAX_CHARS: usize = 120;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    PhoneNumber,
    Email,
    SocialHandle,
    ExternalLink,
    OffPlatformContact,
    ScamPattern,
}

impl ViolationType {
    /// Categories relaxed once funds are in escrow
    pub fn is_contact_sharing(&self) -> bool {
        !matches!(self, ViolationType::ScamPattern)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    #[default]
    Standard,
    Strict,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DetectedViolation {
    pub violation_type: ViolationType,
    pub matched: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct MessageAnalysis {
    pub is_blocked: bool,
    pub violations: Vec<DetectedViolation>,
}

impl MessageAnalysis {
    /// The first blocking category, used as the recorded violation type
    pub fn primary_violation(&self) -> Option<ViolationType> {
        self.violations.first().map(|v| v.violation_type)
    }
}

static SPELLED_DIGIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(zero|one|two|three|four|five|six|seven|eight|nine)\b")
        .expect("Invalid spelled digit regex")
});

/// Calendar dates like `2025-03-15`, `15/03/2025` or `15.03.25`, optionally
/// followed by a `18:30` time
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.](?:\d{4}|\d{2}))\b(?:[\sT]+\d{1,2}[:h]\d{2}\b)?",
    )
    .expect("Invalid date regex")
});

/// Eight or more digits with short separator runs between them
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d(?:[\s\-.()]{0,3}\d){7,}").expect("Invalid phone regex")
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[a-z0-9._%+\-]+\s*(?:@|\(at\)|\[at\])\s*[a-z0-9\-]+(?:\s*(?:\.|\(dot\)|\[dot\]|\bdot\b)\s*[a-z0-9\-]+)*\s*(?:\.|\(dot\)|\[dot\]|\bdot\b)\s*[a-z]{2,}",
    )
    .expect("Invalid email regex")
});

static HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s(:])@[A-Za-z0-9_.]{3,30}").expect("Invalid handle regex")
});

static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:https?://|www\.)\S+|\b[a-z0-9\-]+\.(?:com|net|org|io|me|ly|br|app|link)\b(?:/\S*)?",
    )
    .expect("Invalid link regex")
});

static OFF_PLATFORM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:whats\s?app|wpp|zap|telegram|insta(?:gram)?|facebook|messenger|signal|snap(?:chat)?|discord|tiktok|meet (?:me|up|in person)|in person|call me|text me|dm me|add me|message me (?:on|at))\b",
    )
    .expect("Invalid off-platform regex")
});

static SCAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:gift ?cards?|western union|moneygram|pay (?:me )?(?:outside|off)(?: of)?(?: the)? (?:platform|site|app)|pay (?:me )?directly|skip the (?:platform|fees?)|avoid (?:the )?fees?|bitcoin|usdt|crypto(?:currency)?)\b",
    )
    .expect("Invalid scam regex")
});

/// Strict profile: six or more digits that could be a partial phone number
static PARTIAL_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d(?:[\s\-]{0,2}\d){5,}").expect("Invalid partial number regex")
});

static CONTACT_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:my (?:number|phone|cell|e-?mail)|your (?:number|phone|cell|e-?mail)|phone number|e-?mail me|reach me)\b",
    )
    .expect("Invalid contact request regex")
});

/// Spell-out digits so "nine eight seven" counts as "987"
fn normalize(text: &str) -> String {
    SPELLED_DIGIT
        .replace_all(text, |caps: &Captures| {
            let digit = match caps[1].to_lowercase().as_str() {
                "zero" => "0",
                "one" => "1",
                "two" => "2",
                "three" => "3",
                "four" => "4",
                "five" => "5",
                "six" => "6",
                "seven" => "7",
                "eight" => "8",
                _ => "9",
            };
            digit.to_string()
        })
        .into_owned()
}

fn push_matches(
    found: &mut Vec<DetectedViolation>,
    pattern: &Regex,
    text: &str,
    violation_type: ViolationType,
) {
    for m in pattern.find_iter(text) {
        found.push(DetectedViolation {
            violation_type,
            matched: m.as_str().trim().to_string(),
        });
    }
}

/// Classify a message under the standard profile
pub fn analyze_message(text: &str, mode: FilterMode) -> MessageAnalysis {
    analyze_message_with(text, mode, Strictness::Standard)
}

pub fn analyze_message_with(text: &str, mode: FilterMode, strictness: Strictness) -> MessageAnalysis {
    let normalized = normalize(text);
    let mut found = Vec::new();

    push_matches(&mut found, &SCAM, &normalized, ViolationType::ScamPattern);

    if mode == FilterMode::PreEscrow {
        push_matches(&mut found, &EMAIL, &normalized, ViolationType::Email);

        // Links are checked with emails removed so a mail domain is not double counted.
        let without_emails = EMAIL.replace_all(&normalized, " ");
        push_matches(&mut found, &LINK, &without_emails, ViolationType::ExternalLink);
        push_matches(&mut found, &HANDLE, &without_emails, ViolationType::SocialHandle);
        // Dates are blanked first so event dates never read as phone numbers.
        let without_dates = DATE.replace_all(&without_emails, " ");
        push_matches(&mut found, &PHONE, &without_dates, ViolationType::PhoneNumber);
        push_matches(
            &mut found,
            &OFF_PLATFORM,
            &normalized,
            ViolationType::OffPlatformContact,
        );

        if strictness == Strictness::Strict {
            if !found.iter().any(|v| v.violation_type == ViolationType::PhoneNumber) {
                push_matches(
                    &mut found,
                    &PARTIAL_NUMBER,
                    &without_dates,
                    ViolationType::PhoneNumber,
                );
            }
            push_matches(
                &mut found,
                &CONTACT_REQUEST,
                &normalized,
                ViolationType::OffPlatformContact,
            );
        }
    }

    MessageAnalysis {
        is_blocked: !found.is_empty(),
        violations: found,
    }
}

/// Truncate a message for storage in a violation record
pub fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(SNIPPET_MAX_CHARS).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(analysis: &MessageAnalysis) -> Vec<ViolationType> {
        analysis.violations.iter().map(|v| v.violation_type).collect()
    }

    #[test]
    fn test_clean_message_passes() {
        let analysis = analyze_message(
            "Hi! Is the reservation still available for Saturday? I can pay 150.00",
            FilterMode::PreEscrow,
        );
        assert!(!analysis.is_blocked);
        assert!(analysis.violations.is_empty());
    }

    #[test]
    fn test_phone_number_blocked_pre_escrow() {
        let analysis = analyze_message("call 11 98765-4321 please", FilterMode::PreEscrow);
        assert!(analysis.is_blocked);
        assert!(types(&analysis).contains(&ViolationType::PhoneNumber));
    }

    #[test]
    fn test_spelled_out_digits_detected() {
        let analysis = analyze_message(
            "nine eight seven six five four three two one",
            FilterMode::PreEscrow,
        );
        assert!(types(&analysis).contains(&ViolationType::PhoneNumber));
    }

    #[test]
    fn test_email_and_obfuscated_email() {
        let plain = analyze_message("write to john.doe@gmail.com", FilterMode::PreEscrow);
        assert_eq!(types(&plain), vec![ViolationType::Email]);

        let obfuscated = analyze_message("john (at) gmail (dot) com", FilterMode::PreEscrow);
        assert!(types(&obfuscated).contains(&ViolationType::Email));
    }

    #[test]
    fn test_handles_links_and_apps() {
        let analysis = analyze_message(
            "follow @resale_guy or see www.example.com, or ping me on WhatsApp",
            FilterMode::PreEscrow,
        );
        let found = types(&analysis);
        assert!(found.contains(&ViolationType::SocialHandle));
        assert!(found.contains(&ViolationType::ExternalLink));
        assert!(found.contains(&ViolationType::OffPlatformContact));
    }

    #[test]
    fn test_post_escrow_relaxes_contact_sharing() {
        let analysis = analyze_message(
            "my phone is +55 11 98765 4321 and email ana@mail.com",
            FilterMode::PostEscrow,
        );
        assert!(!analysis.is_blocked);
    }

    #[test]
    fn test_scam_blocked_in_every_mode() {
        for mode in [FilterMode::PreEscrow, FilterMode::PostEscrow] {
            let analysis = analyze_message("just pay me directly with gift cards", mode);
            assert!(analysis.is_blocked);
            assert_eq!(analysis.primary_violation(), Some(ViolationType::ScamPattern));
        }
    }

    #[test]
    fn test_strict_profile_catches_partial_numbers() {
        let text = "first part is 987654";
        assert!(!analyze_message(text, FilterMode::PreEscrow).is_blocked);
        let strict = analyze_message_with(text, FilterMode::PreEscrow, Strictness::Strict);
        assert!(strict.is_blocked);

        let ask = analyze_message_with("what is your number?", FilterMode::PreEscrow, Strictness::Strict);
        assert!(ask.is_blocked);
    }

    #[test]
    fn test_dates_are_not_phone_numbers() {
        for text in [
            "The concert is on 2025-03-15, see you there",
            "Event date 15/03/2025 at 21:00",
            "Doors open 2025-03-15 18:30, show 15.03.25",
        ] {
            let analysis = analyze_message(text, FilterMode::PreEscrow);
            assert!(!analysis.is_blocked, "{}", text);
            let strict = analyze_message_with(text, FilterMode::PreEscrow, Strictness::Strict);
            assert!(!strict.is_blocked, "{}", text);
        }

        let with_phone = analyze_message(
            "Show is 2025-03-15, call 11 98765-4321",
            FilterMode::PreEscrow,
        );
        assert_eq!(types(&with_phone), vec![ViolationType::PhoneNumber]);
        assert_eq!(with_phone.violations[0].matched, "11 98765-4321");
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "a".repeat(500);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_MAX_CHARS + 1);
        assert_eq!(snippet("  short  "), "short");
    }
}
