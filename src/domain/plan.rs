//! Planner output
//!
//! The planner subprocess answers in loosely structured markdown. Section
//! scanning is deliberately forgiving: a section stays "open" until another
//! recognized header appears, so stray sub-headers inside a section do not
//! end it. That looseness occasionally sweeps in unrelated lines; it is
//! tuned against real planner output, so change it only with test coverage.

use serde::{Deserialize, Serialize};

/// The plan a task is executed against
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// One-paragraph summary of the intended change
    pub summary: String,

    /// Ordered implementation steps
    pub approach: Vec<String>,

    /// Files the planner expects to touch or read
    pub relevant_files: Vec<String>,

    /// Directories worth exploring
    pub relevant_dirs: Vec<String>,

    /// Existing code patterns the executor should follow
    pub patterns: Vec<String>,

    /// Anything the planner flagged as risky
    pub warnings: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Summary,
    Approach,
    Files,
    Dirs,
    Patterns,
    Warnings,
}

impl Plan {
    /// Parse a planner response into a plan.
    pub fn parse(response: &str) -> Self {
        let mut plan = Plan::default();
        let mut section = Section::None;
        let mut summary_lines: Vec<String> = Vec::new();

        for line in response.lines() {
            let trimmed = line.trim();

            if let Some(next) = classify_header(trimmed) {
                section = next;
                continue;
            }

            // Unrecognized headers neither switch nor close the section.
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match section {
                Section::None => {}
                Section::Summary => summary_lines.push(trimmed.to_string()),
                Section::Approach => push_item(&mut plan.approach, trimmed),
                Section::Files => push_item(&mut plan.relevant_files, trimmed),
                Section::Dirs => push_item(&mut plan.relevant_dirs, trimmed),
                Section::Patterns => push_item(&mut plan.patterns, trimmed),
                Section::Warnings => push_item(&mut plan.warnings, trimmed),
            }
        }

        plan.summary = summary_lines.join(" ");

        // A planner that skipped headers entirely still yields a summary.
        if plan.summary.is_empty() {
            plan.summary = response
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("")
                .trim()
                .to_string();
        }

        plan
    }

    /// True when the plan names nothing actionable.
    pub fn is_empty(&self) -> bool {
        self.approach.is_empty() && self.relevant_files.is_empty()
    }
}

/// Map a header line to its section. Only recognized headers switch the
/// section; anything else leaves the current one open.
fn classify_header(line: &str) -> Option<Section> {
    let stripped = line.trim_start_matches('#').trim();
    if stripped.len() == line.len() && !line.ends_with(':') {
        return None;
    }
    let name = stripped.trim_end_matches(':').to_lowercase();

    match name.as_str() {
        "summary" | "overview" => Some(Section::Summary),
        "approach" | "steps" | "plan" | "implementation" => Some(Section::Approach),
        "relevant files" | "files" | "files to change" | "files to modify" => Some(Section::Files),
        "relevant directories" | "directories" | "dirs" => Some(Section::Dirs),
        "existing patterns" | "patterns" | "conventions" => Some(Section::Patterns),
        "warnings" | "risks" | "caveats" => Some(Section::Warnings),
        _ => None,
    }
}

/// Strip list markers and collect the item.
fn push_item(items: &mut Vec<String>, line: &str) {
    let item = line
        .trim_start_matches(['-', '*', '•'])
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')'])
        .trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sectioned_plan() {
        let response = "\
## Summary
Add a health endpoint to the router.

## Approach
1. Add the route
2. Write the handler
3. Add a test

## Relevant Files
- server/routes.go
- server/handlers.go

## Warnings
- the router is shared with the admin API
";
        let plan = Plan::parse(response);
        assert_eq!(plan.summary, "Add a health endpoint to the router.");
        assert_eq!(plan.approach.len(), 3);
        assert_eq!(plan.approach[0], "Add the route");
        assert_eq!(
            plan.relevant_files,
            vec!["server/routes.go", "server/handlers.go"]
        );
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn unknown_headers_do_not_close_a_section() {
        let response = "\
## Relevant Files
- a.rs
### Notes on these
- b.rs
";
        let plan = Plan::parse(response);
        // "Notes on these" is not a recognized header, so the files section
        // keeps collecting.
        assert_eq!(plan.relevant_files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn headerless_response_becomes_summary() {
        let plan = Plan::parse("Just do the thing carefully.\n");
        assert_eq!(plan.summary, "Just do the thing carefully.");
        assert!(plan.is_empty());
    }

    #[test]
    fn colon_headers_recognized() {
        let response = "Steps:\n- one\n- two\nFiles:\n- x.py\n";
        let plan = Plan::parse(response);
        assert_eq!(plan.approach, vec!["one", "two"]);
        assert_eq!(plan.relevant_files, vec!["x.py"]);
    }
}
