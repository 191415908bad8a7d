//! Cross-iteration issue identity
//!
//! Review runs repeat, and an LLM reviewer rarely words the same finding the
//! same way twice. The tracker gives issues a stable identity - a content
//! hash first, a Jaccard word-set similarity fallback second - so the loop
//! refactors each finding once instead of thrashing on rephrasings.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::domain::{Issue, Severity};

/// Similarity at or above this is the same issue.
const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Relaxed threshold when two issues share a file and a severity.
const SIMILARITY_THRESHOLD_SAME_CONTEXT: f64 = 0.56;

/// Words ignored when comparing issue descriptions.
const STOPWORDS: [&str; 32] = [
    "the", "and", "for", "are", "but", "not", "was", "has", "have", "had", "can", "could",
    "should", "would", "will", "with", "this", "that", "these", "those", "from", "its", "all",
    "any", "when", "where", "which", "there", "their", "been", "being", "into",
];

/// An issue with identity and lifecycle bookkeeping
#[derive(Debug, Clone)]
pub struct TrackedIssue {
    /// 16-hex content hash
    pub id: String,
    pub issue: Issue,
    /// Iteration the issue first appeared
    pub first_seen: u32,
    /// Iteration the issue was last reported
    pub last_seen: u32,
    pub times_reported: u32,
    pub addressed: bool,
    /// Iteration the issue stopped being reported
    pub addressed_at: Option<u32>,
    /// Ids of issues folded into this one by similarity
    pub similar_ids: Vec<String>,
}

/// Aggregate counts for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueStats {
    pub total: usize,
    pub addressed: usize,
    pub critical: usize,
    pub major: usize,
    pub minor: usize,
    pub persistent: usize,
    pub current_iteration: u32,
}

/// Tracks issue identity across review iterations
#[derive(Debug, Default)]
pub struct IssueTracker {
    issues: Vec<TrackedIssue>,
    iteration: u32,
}

impl IssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Ingest one review's issues. Advances the iteration counter, matches
    /// incoming issues against known ones (exact hash, then similarity),
    /// and marks known issues that went missing as addressed.
    ///
    /// Returns the ids of the issues reported this iteration.
    pub fn track(&mut self, incoming: &[Issue]) -> Vec<String> {
        self.iteration += 1;
        let iteration = self.iteration;
        let mut reported_ids = Vec::new();

        for issue in incoming {
            let id = issue_id(issue);

            if let Some(existing) = self.issues.iter_mut().find(|t| t.id == id) {
                existing.times_reported += 1;
                existing.last_seen = iteration;
                existing.addressed = false;
                existing.addressed_at = None;
                reported_ids.push(id);
                continue;
            }

            if let Some(existing) = self.find_similar_mut(issue) {
                existing.times_reported += 1;
                existing.last_seen = iteration;
                existing.addressed = false;
                existing.addressed_at = None;
                if !existing.similar_ids.contains(&id) {
                    existing.similar_ids.push(id);
                }
                reported_ids.push(existing.id.clone());
                continue;
            }

            reported_ids.push(id.clone());
            self.issues.push(TrackedIssue {
                id,
                issue: issue.clone(),
                first_seen: iteration,
                last_seen: iteration,
                times_reported: 1,
                addressed: false,
                addressed_at: None,
                similar_ids: Vec::new(),
            });
        }

        // Anything known that was not re-reported has been addressed.
        for tracked in &mut self.issues {
            if tracked.last_seen < iteration && !tracked.addressed {
                tracked.addressed = true;
                tracked.addressed_at = Some(iteration);
            }
        }

        reported_ids
    }

    fn find_similar_mut(&mut self, issue: &Issue) -> Option<&mut TrackedIssue> {
        let words = issue_words(&issue.description);
        self.issues.iter_mut().find(|tracked| {
            let threshold = if tracked.issue.file == issue.file
                && tracked.issue.severity == issue.severity
                && issue.file.is_some()
            {
                SIMILARITY_THRESHOLD_SAME_CONTEXT
            } else {
                SIMILARITY_THRESHOLD
            };
            jaccard(&words, &issue_words(&tracked.issue.description)) >= threshold
        })
    }

    /// Issues first reported in the current iteration.
    pub fn new_issues(&self) -> Vec<&TrackedIssue> {
        self.issues
            .iter()
            .filter(|t| t.first_seen == self.iteration)
            .collect()
    }

    /// Issues reported in more than one iteration and still open.
    pub fn persistent_issues(&self) -> Vec<&TrackedIssue> {
        self.issues
            .iter()
            .filter(|t| t.times_reported > 1 && !t.addressed)
            .collect()
    }

    pub fn addressed_issues(&self) -> Vec<&TrackedIssue> {
        self.issues.iter().filter(|t| t.addressed).collect()
    }

    pub fn unaddressed_issues(&self) -> Vec<&TrackedIssue> {
        self.issues.iter().filter(|t| !t.addressed).collect()
    }

    pub fn critical_issues(&self) -> Vec<&TrackedIssue> {
        self.issues
            .iter()
            .filter(|t| t.issue.severity == Severity::Critical && !t.addressed)
            .collect()
    }

    pub fn stats(&self) -> IssueStats {
        let count = |severity: Severity| {
            self.issues
                .iter()
                .filter(|t| t.issue.severity == severity)
                .count()
        };
        IssueStats {
            total: self.issues.len(),
            addressed: self.addressed_issues().len(),
            critical: count(Severity::Critical),
            major: count(Severity::Major),
            minor: count(Severity::Minor),
            persistent: self.persistent_issues().len(),
            current_iteration: self.iteration,
        }
    }
}

/// Stable id: first 8 bytes of sha256 over normalized description, file,
/// and line. Severity is deliberately not salted in; two findings differing
/// only in severity collapse to one.
pub fn issue_id(issue: &Issue) -> String {
    let normalized = normalize(&issue.description);
    let salt = format!(
        "{}|{}|{}",
        normalized,
        issue.file.as_deref().unwrap_or(""),
        issue.line.map(|l| l.to_string()).unwrap_or_default()
    );
    let digest = Sha256::digest(salt.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased alphanumeric tokens of length >= 3, stopwords removed.
fn issue_words(text: &str) -> HashSet<String> {
    normalize(text)
        .split_whitespace()
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(description: &str) -> Issue {
        Issue::new(Severity::Major, description)
    }

    #[test]
    fn id_is_16_hex_and_stable_under_formatting() {
        let a = issue_id(&issue("Missing timestamp field!"));
        let b = issue_id(&issue("missing   TIMESTAMP-field"));
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, b);
    }

    #[test]
    fn id_ignores_severity_but_not_location() {
        let mut critical = issue("missing timestamp field");
        critical.severity = Severity::Critical;
        assert_eq!(issue_id(&critical), issue_id(&issue("missing timestamp field")));

        let located = issue("missing timestamp field").in_file("a.rs");
        assert_ne!(issue_id(&located), issue_id(&issue("missing timestamp field")));
    }

    #[test]
    fn repeat_reports_bump_times_reported() {
        let mut tracker = IssueTracker::new();
        let issues = vec![issue("missing timestamp field")];

        tracker.track(&issues);
        tracker.track(&issues);

        let stats = tracker.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.addressed, 0);
        assert_eq!(stats.current_iteration, 2);
        assert_eq!(tracker.unaddressed_issues()[0].times_reported, 2);
        assert!(!tracker.unaddressed_issues()[0].addressed);
    }

    #[test]
    fn absent_issues_are_marked_addressed() {
        let mut tracker = IssueTracker::new();
        tracker.track(&[issue("missing timestamp field")]);
        tracker.track(&[]);

        let stats = tracker.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.addressed, 1);
        let addressed = tracker.addressed_issues();
        assert_eq!(addressed[0].addressed_at, Some(2));
    }

    #[test]
    fn reappearance_clears_addressed() {
        let mut tracker = IssueTracker::new();
        let issues = vec![issue("missing timestamp field")];
        tracker.track(&issues);
        tracker.track(&[]);
        tracker.track(&issues);

        let tracked = tracker.unaddressed_issues();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].times_reported, 2);
        assert_eq!(tracked[0].addressed_at, None);
    }

    #[test]
    fn rephrased_issue_folds_by_similarity() {
        let mut tracker = IssueTracker::new();
        tracker.track(&[issue("handler drops the database error silently")]);
        tracker.track(&[issue("the handler silently drops the database error")]);

        let stats = tracker.stats();
        assert_eq!(stats.total, 1, "rephrasing should not create a second issue");
        let tracked = tracker.unaddressed_issues();
        assert_eq!(tracked[0].times_reported, 2);
        assert!(!tracked[0].similar_ids.is_empty());
    }

    #[test]
    fn unrelated_issues_stay_distinct() {
        let mut tracker = IssueTracker::new();
        tracker.track(&[
            issue("handler drops the database error silently"),
            issue("retry loop never terminates on timeout"),
        ]);
        assert_eq!(tracker.stats().total, 2);
    }

    #[test]
    fn same_file_same_severity_relaxes_threshold() {
        let a = issue("query builder concatenates unsanitized user input causing injection")
            .in_file("db.rs");
        let b = issue("query builder concatenates raw user input allows injection")
            .in_file("db.rs");

        // Below the strict threshold, above the relaxed one.
        let sim = jaccard(&issue_words(&a.description), &issue_words(&b.description));
        assert!(sim < SIMILARITY_THRESHOLD && sim >= SIMILARITY_THRESHOLD_SAME_CONTEXT,
            "similarity {} outside the band this test needs", sim);

        let mut tracker = IssueTracker::new();
        tracker.track(&[a]);
        tracker.track(&[b]);
        assert_eq!(tracker.stats().total, 1);
    }

    #[test]
    fn persistent_issues_require_repeat_and_open() {
        let mut tracker = IssueTracker::new();
        let repeat = issue("missing timestamp field");
        let once = issue("rename the helper for clarity");

        tracker.track(&[repeat.clone(), once]);
        tracker.track(&[repeat]);

        let persistent = tracker.persistent_issues();
        assert_eq!(persistent.len(), 1);
        assert_eq!(persistent[0].issue.description, "missing timestamp field");
        assert_eq!(tracker.stats().persistent, 1);
    }

    #[test]
    fn new_issues_are_per_current_iteration() {
        let mut tracker = IssueTracker::new();
        tracker.track(&[issue("first finding about the parser")]);
        tracker.track(&[
            issue("first finding about the parser"),
            issue("second finding about the encoder"),
        ]);

        let new = tracker.new_issues();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].issue.description, "second finding about the encoder");
    }
}
