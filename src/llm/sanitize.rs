//! Prompt sanitization
//!
//! Every user-controlled or service-supplied string passes through here
//! before it is embedded in a language-model prompt: inject-pattern
//! filtering, control-character stripping, quote/brace escaping, and
//! per-kind length caps.

use lazy_static::lazy_static;
use regex::Regex;

/// What kind of text is being embedded; determines the length cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Query,
    SpeciesName,
    Location,
    General,
}

impl InputKind {
    fn max_len(self) -> usize {
        match self {
            Self::Query => 1000,
            Self::SpeciesName => 100,
            Self::Location => 200,
            Self::General => 500,
        }
    }
}

/// Result of sanitizing one input
#[derive(Debug, Clone)]
pub struct SanitizationResult {
    pub sanitized_text: String,
    pub threats_detected: Vec<String>,
    pub is_safe: bool,
}

lazy_static! {
    /// Pattern families that indicate prompt-injection attempts. Matches are
    /// replaced with "[FILTERED]" and recorded as threats.
    static ref INJECTION_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Instruction override
        (
            Regex::new(r"(?i)ignore\s+(?:all\s+)?(?:previous|prior|above)\s+(?:instructions?|commands?|prompts?)").unwrap(),
            "instruction_override",
        ),
        (
            Regex::new(r"(?i)forget\s+(?:everything|all|what)\s+(?:above|before|previously)").unwrap(),
            "memory_wipe",
        ),
        (
            Regex::new(r"(?i)(?:new|different|updated)\s+(?:instructions?|commands?|system\s+prompt)").unwrap(),
            "instruction_replacement",
        ),
        // System prompt extraction
        (
            Regex::new(r"(?i)(?:show|display|print|reveal|tell)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+)?(?:prompt|instructions?)").unwrap(),
            "system_extraction",
        ),
        (
            Regex::new(r"(?i)repeat\s+(?:your|the)\s+(?:system\s+)?(?:prompt|instructions?)").unwrap(),
            "system_extraction",
        ),
        // Role hijacking
        (
            Regex::new(r"(?i)(?:you\s+are|act\s+as|pretend\s+to\s+be|roleplay\s+as)\s+(?:a\s+)?(?:different|new|evil|malicious)").unwrap(),
            "role_hijack",
        ),
        (
            Regex::new(r"(?i)\bsystem\s*:\s*").unwrap(),
            "role_impersonation",
        ),
        // Code injection
        (
            Regex::new(r"(?i)<\s*(?:script|iframe|object|embed)").unwrap(),
            "html_injection",
        ),
        (
            Regex::new(r"(?i)javascript\s*:").unwrap(),
            "javascript_injection",
        ),
        (
            Regex::new(r"(?i)(?:eval|exec|system|shell)\s*\(").unwrap(),
            "code_execution",
        ),
        // SQL injection
        (
            Regex::new(r"(?i)(?:union|select|insert|update|delete|drop)\s+.*(?:from|into|table)").unwrap(),
            "sql_injection",
        ),
        // Template injection
        (
            Regex::new(r"\{\{[^}]*\}\}|\{%[^}]*%\}").unwrap(),
            "template_injection",
        ),
        // Command injection
        (
            Regex::new(r"(?i)[;&|`$]\s*(?:rm|del|format|shutdown|reboot)").unwrap(),
            "command_injection",
        ),
        // Information disclosure
        (
            Regex::new(r"(?i)(?:api\s+key|password|token|secret|credential)").unwrap(),
            "info_disclosure",
        ),
    ];

    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Sanitize user input for safe inclusion in an LLM prompt
pub fn sanitize(text: &str, kind: InputKind) -> SanitizationResult {
    let mut threats = Vec::new();

    // Strip control characters
    let mut cleaned: String = text
        .chars()
        .filter(|c| {
            if c.is_control() && *c != '\n' && *c != '\t' {
                threats.push(format!("control_char_{}", *c as u32));
                false
            } else {
                true
            }
        })
        .collect();

    // Filter injection patterns
    for (pattern, threat) in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&cleaned) {
            threats.push((*threat).to_string());
            cleaned = pattern.replace_all(&cleaned, "[FILTERED]").into_owned();
        }
    }

    // Normalize whitespace
    cleaned = WHITESPACE.replace_all(&cleaned, " ").trim().to_string();

    // Escape characters that could break prompt structure
    cleaned = cleaned
        .replace('"', "\\\"")
        .replace('`', "\\`")
        .replace('{', "\\{")
        .replace('}', "\\}");

    // Length cap
    let max_len = kind.max_len();
    if cleaned.chars().count() > max_len {
        cleaned = cleaned.chars().take(max_len - 3).collect::<String>() + "...";
        threats.push("length_exceeded".to_string());
    }

    let is_safe = threats.len() < 3;
    SanitizationResult {
        sanitized_text: cleaned,
        threats_detected: threats,
        is_safe,
    }
}

/// Convenience wrapper returning only the sanitized text.
/// Unsafe inputs are logged and still returned filtered.
pub fn sanitize_text(text: &str, kind: InputKind) -> String {
    let result = sanitize(text, kind);
    if !result.is_safe {
        tracing::warn!(
            threats = ?result.threats_detected,
            "input flagged during prompt sanitization"
        );
    }
    result.sanitized_text
}
