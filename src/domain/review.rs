//! Review verdicts and issues
//!
//! Reviewer subprocesses are asked to answer with a JSON verdict, but they
//! are LLMs and sometimes answer in prose. The parser here accepts both: a
//! fenced JSON block when present, and a deliberately fuzzy natural-language
//! scan otherwise. The heuristics (severity markers, issue phrases, the
//! 50-char dedup prefix, the 10-issue cap) are tuned against real reviewer
//! output; keep them as they are.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Issue severity, as reported by the reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding raised by a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,

    /// File the issue is in, when the reviewer named one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Line number, when the reviewer named one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    pub description: String,

    /// Suggested fix, when the reviewer offered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            line: None,
            description: description.into(),
            suggestion: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Pass/fail thresholds for natural-language verdicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewThresholds {
    /// Unaddressed critical issues at or above this count fail the review
    #[serde(default = "default_max_critical_issues")]
    pub max_critical_issues: usize,

    /// Unaddressed major issues above this count fail the review
    #[serde(default = "default_max_major_issues")]
    pub max_major_issues: usize,

    /// When true, a broader keyword set auto-fails prose verdicts
    #[serde(default)]
    pub strict_parsing: bool,
}

fn default_max_critical_issues() -> usize {
    1
}

fn default_max_major_issues() -> usize {
    3
}

impl Default for ReviewThresholds {
    fn default() -> Self {
        Self {
            max_critical_issues: default_max_critical_issues(),
            max_major_issues: default_max_major_issues(),
            strict_parsing: false,
        }
    }
}

/// Outcome of one review pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub passed: bool,

    /// Reviewer's overall score, 0-100
    pub score: u8,

    pub summary: String,

    #[serde(default)]
    pub issues: Vec<Issue>,

    /// Positive observations, surfaced to the user but otherwise unused
    #[serde(default)]
    pub praise: Vec<String>,

    /// Free-form guidance handed to the refactor agent
    #[serde(default)]
    pub guidance: String,
}

impl ReviewResult {
    /// Parse a reviewer response.
    ///
    /// Tries a JSON verdict first (fenced block or bare object); on parse
    /// failure falls back to the natural-language heuristics.
    pub fn parse(response: &str, thresholds: &ReviewThresholds) -> Self {
        if let Some(parsed) = Self::parse_json(response) {
            return parsed;
        }
        Self::parse_natural_language(response, thresholds)
    }

    fn parse_json(response: &str) -> Option<Self> {
        let candidate = extract_json_block(response)?;
        let mut result: ReviewResult = serde_json::from_str(&candidate).ok()?;
        result.score = result.score.min(100);
        Some(result)
    }

    /// Keyword-scan fallback for prose verdicts.
    fn parse_natural_language(response: &str, thresholds: &ReviewThresholds) -> Self {
        let issues = scan_issues(response);

        let critical = issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count();
        let major = issues
            .iter()
            .filter(|i| i.severity == Severity::Major)
            .count();

        let mut passed =
            critical < thresholds.max_critical_issues && major <= thresholds.max_major_issues;

        let lower = response.to_lowercase();
        let auto_fail: &[&str] = if thresholds.strict_parsing {
            &[
                "cannot be merged",
                "blocking issue",
                "must not merge",
                "do not merge",
                "reject",
                "fails review",
            ]
        } else {
            &["cannot be merged", "blocking issue"]
        };
        if auto_fail.iter().any(|phrase| lower.contains(phrase)) {
            passed = false;
        }

        let score = if passed {
            (85u32.saturating_sub(5 * issues.len() as u32)).max(60) as u8
        } else {
            (50u32.saturating_sub(10 * critical as u32)).max(10) as u8
        };

        Self {
            passed,
            score,
            summary: first_line(response, 200),
            issues,
            praise: Vec::new(),
            guidance: String::new(),
        }
    }

    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count()
    }

    pub fn major_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Major)
            .count()
    }
}

/// Extract a JSON object from a response: a ```json fenced block, or the
/// outermost braces of the text.
fn extract_json_block(response: &str) -> Option<String> {
    static FENCED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

    if let Some(caps) = FENCED.captures(response) {
        return Some(caps[1].to_string());
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end > start {
        Some(response[start..=end].to_string())
    } else {
        None
    }
}

/// Scan prose for issue-looking lines.
///
/// A line counts as an issue when it carries a severity marker or one of the
/// issue phrases. Deduplication is on the first 50 characters of the
/// description; at most 10 issues are extracted.
fn scan_issues(response: &str) -> Vec<Issue> {
    static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+\.)\s+").unwrap());

    let mut issues = Vec::new();
    let mut seen_prefixes: Vec<String> = Vec::new();

    for line in response.lines() {
        if issues.len() >= 10 {
            break;
        }

        let stripped = BULLET.replace(line, "");
        let text = stripped.trim();
        if text.len() < 10 {
            continue;
        }

        let lower = text.to_lowercase();
        let severity = if lower.contains("critical") || lower.contains("security") {
            Some(Severity::Critical)
        } else if lower.contains("major") || lower.contains("bug") || lower.contains("error") {
            Some(Severity::Major)
        } else if lower.contains("minor")
            || lower.contains("nit")
            || lower.contains("issue")
            || lower.contains("problem")
            || lower.contains("missing")
            || lower.contains("should")
        {
            Some(Severity::Minor)
        } else {
            None
        };

        let Some(severity) = severity else { continue };

        let prefix: String = text.chars().take(50).collect();
        if seen_prefixes.contains(&prefix) {
            continue;
        }
        seen_prefixes.push(prefix);

        issues.push(Issue {
            severity,
            file: extract_file_ref(text),
            line: None,
            description: text.to_string(),
            suggestion: None,
        });
    }

    issues
}

/// Pull a `path/to/file.ext` reference out of an issue line, if present.
fn extract_file_ref(text: &str) -> Option<String> {
    static FILE_REF: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[\w./-]+\.(?:rs|go|py|rb|js|jsx|ts|tsx|java|c|h|cpp)\b").unwrap());
    FILE_REF.find(text).map(|m| m.as_str().to_string())
}

fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.trim().chars().take(max).collect()
}
