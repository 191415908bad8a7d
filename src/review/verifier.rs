//! Diff verification
//!
//! After a refactor run, we do not trust the agent's claim that it fixed
//! what it was asked to fix. The verifier matches each raised issue against
//! evidence in the new diff - keyword hits in added lines, removed
//! problematic patterns, or plain change volume scaled by severity - and
//! scans for newly introduced debris. All of it is deliberately fuzzy and
//! tuned against LLM output; thresholds are part of the contract.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::domain::{Issue, Severity};

/// Words ignored when extracting issue keywords.
const STOPWORDS: [&str; 32] = [
    "the", "and", "for", "are", "but", "not", "was", "has", "have", "had", "can", "could",
    "should", "would", "will", "with", "this", "that", "these", "those", "from", "its", "all",
    "any", "when", "where", "which", "there", "their", "been", "being", "into",
];

/// Per-file buckets of one parsed diff
#[derive(Debug, Clone, Default)]
struct FileDelta {
    added: Vec<String>,
    removed: Vec<String>,
    #[allow(dead_code)]
    context: Vec<String>,
}

/// Verdict for one raised issue
#[derive(Debug, Clone)]
pub struct IssueVerdict {
    pub issue: Issue,
    pub addressed: bool,
    /// Human-readable reason for the verdict
    pub evidence: String,
}

/// Something concerning (or at least notable) added by the refactor
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub file: String,
    pub message: String,
    /// Debug-print additions are reported but do not cost confidence
    pub concerning: bool,
}

/// Full verifier output for one refactor iteration
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub verdicts: Vec<IssueVerdict>,
    pub new_issues: Vec<NewIssue>,
    /// 0-100
    pub confidence: u8,
}

impl VerificationReport {
    pub fn addressed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.addressed).count()
    }

    pub fn unaddressed(&self) -> Vec<&IssueVerdict> {
        self.verdicts.iter().filter(|v| !v.addressed).collect()
    }

    pub fn meets(&self, min_confidence: u8) -> bool {
        self.confidence >= min_confidence
    }
}

/// Heuristic issue-to-diff matcher
#[derive(Debug, Clone, Default)]
pub struct DiffVerifier;

impl DiffVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Match issues against the refactor's diff. `old_diff` is the diff
    /// before the refactor ran; added lines already present there are not
    /// treated as newly introduced.
    pub fn verify(&self, issues: &[Issue], old_diff: &str, new_diff: &str) -> VerificationReport {
        let old = parse_diff(old_diff);
        let new = parse_diff(new_diff);

        let verdicts: Vec<IssueVerdict> = issues
            .iter()
            .map(|issue| verify_issue(issue, &new))
            .collect();

        let new_issues = detect_new_issues(&old, &new);

        let addressed = verdicts.iter().filter(|v| v.addressed).count();
        let total = verdicts.len();
        let concerning = new_issues.iter().filter(|n| n.concerning).count();

        let mut confidence = 85.0 - 5.0 * concerning as f64;
        let ratio = if total == 0 {
            1.0
        } else {
            addressed as f64 / total as f64
        };
        confidence *= 0.7 + 0.3 * ratio;

        VerificationReport {
            verdicts,
            new_issues,
            confidence: confidence.clamp(0.0, 100.0).round() as u8,
        }
    }
}

fn verify_issue(issue: &Issue, diff: &HashMap<String, FileDelta>) -> IssueVerdict {
    // An issue that names a file needs that file to have been touched.
    let scope: Vec<&FileDelta> = match &issue.file {
        Some(file) => {
            let Some(delta) = diff
                .iter()
                .find(|(path, _)| path.ends_with(file.as_str()) || file.ends_with(path.as_str()))
                .map(|(_, d)| d)
            else {
                return IssueVerdict {
                    issue: issue.clone(),
                    addressed: false,
                    evidence: "file was not modified".to_string(),
                };
            };
            vec![delta]
        }
        None => diff.values().collect(),
    };

    let keywords = issue_keywords(issue);
    let keyword_hits: usize = scope
        .iter()
        .flat_map(|d| d.added.iter())
        .filter(|line| {
            let lower = line.to_lowercase();
            keywords.iter().any(|k| lower.contains(k.as_str()))
        })
        .count();
    if keyword_hits >= 1 {
        return IssueVerdict {
            issue: issue.clone(),
            addressed: true,
            evidence: format!("related changes ({} keyword matches in added lines)", keyword_hits),
        };
    }

    // Problematic patterns named by the issue disappearing is evidence too.
    let patterns = issue_patterns(&issue.description);
    let removed_hit = scope
        .iter()
        .flat_map(|d| d.removed.iter())
        .any(|line| patterns.iter().any(|p| line.contains(p.as_str())));
    if removed_hit {
        return IssueVerdict {
            issue: issue.clone(),
            addressed: true,
            evidence: "problematic pattern removed".to_string(),
        };
    }

    // Fallback: enough change volume for the severity.
    let added: usize = scope.iter().map(|d| d.added.len()).sum();
    let removed: usize = scope.iter().map(|d| d.removed.len()).sum();
    let enough = match issue.severity {
        Severity::Critical => added >= 3 || removed >= 2,
        Severity::Major => added >= 1 || removed >= 1,
        Severity::Minor => added + removed >= 1,
    };

    IssueVerdict {
        issue: issue.clone(),
        addressed: enough,
        evidence: if enough {
            format!("change volume ({} added, {} removed)", added, removed)
        } else {
            "no relevant changes found".to_string()
        },
    }
}

/// Parse a unified diff into per-file added/removed/context buckets.
fn parse_diff(diff: &str) -> HashMap<String, FileDelta> {
    static NEW_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+\+\+ b/(.+)").unwrap());

    let mut files: HashMap<String, FileDelta> = HashMap::new();
    let mut current: Option<String> = None;

    for line in diff.lines() {
        if let Some(caps) = NEW_FILE.captures(line) {
            let path = caps[1].trim().to_string();
            files.entry(path.clone()).or_default();
            current = Some(path);
            continue;
        }
        if line.starts_with("---") || line.starts_with("diff --git") || line.starts_with("index ")
        {
            continue;
        }

        let Some(path) = &current else { continue };
        let delta = files.entry(path.clone()).or_default();
        if let Some(added) = line.strip_prefix('+') {
            delta.added.push(added.to_string());
        } else if let Some(removed) = line.strip_prefix('-') {
            delta.removed.push(removed.to_string());
        } else if !line.starts_with("@@") {
            delta.context.push(line.to_string());
        }
    }

    files
}

/// Keywords from description + suggestion: identifier-shaped tokens, three
/// chars or longer, stopwords dropped.
fn issue_keywords(issue: &Issue) -> Vec<String> {
    static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*").unwrap());

    let mut text = issue.description.to_lowercase();
    if let Some(suggestion) = &issue.suggestion {
        text.push(' ');
        text.push_str(&suggestion.to_lowercase());
    }

    let mut seen = HashSet::new();
    TOKEN
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Code-shaped patterns lifted from an issue description: quoted strings
/// and `name(args)` call tokens.
fn issue_patterns(description: &str) -> Vec<String> {
    static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["'`]([^"'`]{2,60})["'`]"#).unwrap());
    static CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\([^)]*\)").unwrap());

    let mut patterns: Vec<String> = QUOTED
        .captures_iter(description)
        .map(|c| c[1].to_string())
        .collect();
    patterns.extend(CALL.find_iter(description).map(|m| m.as_str().to_string()));
    patterns
}

/// Scan added lines (excluding ones already added before the refactor) for
/// leftover debris.
fn detect_new_issues(
    old: &HashMap<String, FileDelta>,
    new: &HashMap<String, FileDelta>,
) -> Vec<NewIssue> {
    static CONCERNING: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)fixme:|xxx:|binding\.pry|debugger;").unwrap());
    static DEBUG_PRINT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"console\.log\(|println!\(|\bputs\s|print\(").unwrap());

    let old_added: HashSet<&str> = old
        .values()
        .flat_map(|d| d.added.iter())
        .map(|s| s.as_str())
        .collect();

    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for (file, delta) in new {
        for line in &delta.added {
            if old_added.contains(line.as_str()) {
                continue;
            }
            let concerning = CONCERNING.is_match(line);
            let debug_print = DEBUG_PRINT.is_match(line);
            if !concerning && !debug_print {
                continue;
            }
            let message = format!("{}: {}", file, line.trim());
            if seen.insert(message.clone()) {
                found.push(NewIssue {
                    file: file.clone(),
                    message,
                    concerning,
                });
            }
        }
    }

    found.sort_by(|a, b| a.message.cmp(&b.message));
    found
}
