//! Token-budgeted content compression
//!
//! Handoffs between stages must fit an estimated token budget. The engine
//! takes an ordered list of typed content blocks, estimates the total, and
//! when it overflows applies progressively harsher compression - from
//! whitespace collapsing down to one-line summaries - spending the budget on
//! high-priority blocks first. Required blocks are compressed in place but
//! never dropped.

use once_cell::sync::Lazy;
use regex::Regex;

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Floor below which a block gets a one-line summary instead of content.
const MIN_BLOCK_TOKENS: usize = 50;

/// One typed unit of handoff content
#[derive(Debug, Clone)]
pub struct ContentBlock {
    /// Content type, e.g. "issues", "diff", "code"
    pub block_type: String,

    pub content: String,

    /// 0-100; higher priorities keep more of their budget share
    pub priority: u8,

    /// Required blocks are compressed but never dropped
    pub required: bool,
}

impl ContentBlock {
    /// New block with the default priority for its type.
    pub fn new(block_type: impl Into<String>, content: impl Into<String>) -> Self {
        let block_type = block_type.into();
        let priority = default_priority(&block_type);
        Self {
            block_type,
            content: content.into(),
            priority,
            required: false,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

fn default_priority(block_type: &str) -> u8 {
    match block_type {
        "issues" => 100,
        "requirements" => 90,
        "approach" => 80,
        "guidance" => 70,
        "files" => 60,
        "patterns" => 50,
        "diff" => 40,
        "code" => 30,
        "context" => 20,
        _ => 20,
    }
}

/// How hard the compressor squeezes, derived from the overflow ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    Light,
    Medium,
    Heavy,
    Extreme,
}

impl CompressionLevel {
    fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.9 {
            CompressionLevel::Light
        } else if ratio >= 0.6 {
            CompressionLevel::Medium
        } else if ratio >= 0.3 {
            CompressionLevel::Heavy
        } else {
            CompressionLevel::Extreme
        }
    }

    /// Budget share factor for each level.
    fn factor(&self) -> f64 {
        match self {
            CompressionLevel::Light => 0.8,
            CompressionLevel::Medium => 0.5,
            CompressionLevel::Heavy => 0.3,
            CompressionLevel::Extreme => 0.15,
        }
    }
}

/// The compression engine
#[derive(Debug, Clone, Default)]
pub struct Compressor;

impl Compressor {
    pub fn new() -> Self {
        Self
    }

    /// Fit blocks into a token budget.
    ///
    /// Within budget, the result is the plain concatenation. Over budget,
    /// blocks are served in (required, priority) order, each getting a share
    /// of the remaining budget weighted by its priority and the compression
    /// level; optional blocks are dropped once the budget runs dry.
    pub fn compress(&self, blocks: &[ContentBlock], budget: usize) -> String {
        let total: usize = blocks.iter().map(|b| estimate_tokens(&b.content)).sum();
        if total <= budget {
            return blocks
                .iter()
                .map(|b| b.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
        }

        let mut ordered: Vec<&ContentBlock> = blocks.iter().collect();
        ordered.sort_by(|a, b| {
            b.required
                .cmp(&a.required)
                .then(b.priority.cmp(&a.priority))
        });

        let level = CompressionLevel::from_ratio(budget as f64 / total.max(1) as f64);
        let floor = MIN_BLOCK_TOKENS / blocks.len().max(1);

        let mut parts: Vec<String> = Vec::new();
        let mut remaining = budget as isize;

        for block in ordered {
            if remaining < floor as isize && !block.required {
                tracing::debug!(
                    "Dropping '{}' block: {} tokens of budget left",
                    block.block_type,
                    remaining
                );
                continue;
            }

            let share = (remaining.max(0) as f64) * (block.priority as f64 / 100.0)
                * level.factor();
            let block_budget = share as usize;

            let rendered = if block_budget < MIN_BLOCK_TOKENS && block.priority > 50 {
                summary_line(block)
            } else if block.required && block_budget < MIN_BLOCK_TOKENS {
                summary_line(block)
            } else {
                apply_level(level, block, block_budget)
            };

            remaining -= estimate_tokens(&rendered) as isize;
            parts.push(rendered);
        }

        parts.join("\n\n")
    }
}

/// One-line `[type] summary` rendering.
fn summary_line(block: &ContentBlock) -> String {
    let first = first_sentence_or_line(&block.content);
    format!("[{}] {}", block.block_type, truncate_chars(first, 150))
}

fn first_sentence_or_line(text: &str) -> &str {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    match line.find(". ") {
        Some(idx) => &line[..idx + 1],
        None => line,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.trim().to_string()
    } else {
        s.chars().take(max).collect::<String>().trim().to_string()
    }
}

fn apply_level(level: CompressionLevel, block: &ContentBlock, token_budget: usize) -> String {
    match level {
        CompressionLevel::Light => compress_light(&block.content, token_budget),
        CompressionLevel::Medium => compress_medium(&block.content, token_budget),
        CompressionLevel::Heavy => compress_heavy(block, token_budget),
        CompressionLevel::Extreme => summary_line(block),
    }
}

/// Collapse blank runs and space runs, then truncate.
fn compress_light(content: &str, token_budget: usize) -> String {
    static BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
    static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

    let collapsed = BLANKS.replace_all(content, "\n\n");
    let collapsed = SPACES.replace_all(&collapsed, " ");
    truncate_to_tokens(&collapsed, token_budget)
}

/// Drop blank lines, comments, and example prose, then truncate.
fn compress_medium(content: &str, token_budget: usize) -> String {
    static KEEP_COMMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"TODO|FIXME|HACK|NOTE|IMPORTANT|WARNING").unwrap());
    static EXAMPLE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)example:|for example|e\.g\.|such as").unwrap());

    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            let is_comment = trimmed.starts_with("//")
                || trimmed.starts_with('#')
                || trimmed.starts_with("/*")
                || trimmed.starts_with('*');
            if is_comment && !KEEP_COMMENT.is_match(trimmed) {
                return false;
            }
            !EXAMPLE.is_match(trimmed)
        })
        .collect();

    truncate_to_tokens(&kept.join("\n"), token_budget)
}

/// Structural extraction, dispatched on content type.
fn compress_heavy(block: &ContentBlock, token_budget: usize) -> String {
    static SIGNATURE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*(func|def|function|class|type|interface)\s+\w+").unwrap());
    static ACCESS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*(public|private|protected|pub)\b").unwrap());
    static HUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@@.*@@").unwrap());
    static LIST_ITEM: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*(?:[-*•]\s+|\d+\.\s+)").unwrap());

    let extracted = match block.block_type.as_str() {
        "code" | "diff" => {
            let kept: Vec<&str> = block
                .content
                .lines()
                .filter(|line| {
                    SIGNATURE.is_match(line)
                        || ACCESS.is_match(line)
                        || HUNK.is_match(line)
                        || line.starts_with("+++")
                        || line.starts_with("---")
                })
                .collect();
            kept.join("\n")
        }
        "issues" | "requirements" => {
            let kept: Vec<&str> = block
                .content
                .lines()
                .filter(|line| LIST_ITEM.is_match(line))
                .collect();
            kept.join("\n")
        }
        _ => first_paragraph(&block.content),
    };

    if extracted.trim().is_empty() {
        summary_line(block)
    } else {
        truncate_to_tokens(&extracted, token_budget)
    }
}

/// First paragraph of at least 50 characters.
fn first_paragraph(content: &str) -> String {
    let mut current = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            let para = current.join("\n");
            if para.len() >= 50 {
                return para;
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    current.join("\n")
}

fn truncate_to_tokens(text: &str, token_budget: usize) -> String {
    let char_budget = token_budget.saturating_mul(4);
    if text.chars().count() <= char_budget {
        text.to_string()
    } else {
        text.chars().take(char_budget).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(block_type: &str, content: &str) -> ContentBlock {
        ContentBlock::new(block_type, content)
    }

    #[test]
    fn within_budget_is_plain_concatenation() {
        let blocks = vec![block("context", "alpha"), block("issues", "beta")];
        let out = Compressor::new().compress(&blocks, 1_000_000);
        assert_eq!(out, "alpha\n\nbeta");
    }

    #[test]
    fn default_priorities_by_type() {
        assert_eq!(ContentBlock::new("issues", "").priority, 100);
        assert_eq!(ContentBlock::new("requirements", "").priority, 90);
        assert_eq!(ContentBlock::new("diff", "").priority, 40);
        assert_eq!(ContentBlock::new("unknown", "").priority, 20);
    }

    #[test]
    fn level_from_ratio() {
        assert_eq!(CompressionLevel::from_ratio(0.95), CompressionLevel::Light);
        assert_eq!(CompressionLevel::from_ratio(0.7), CompressionLevel::Medium);
        assert_eq!(CompressionLevel::from_ratio(0.4), CompressionLevel::Heavy);
        assert_eq!(CompressionLevel::from_ratio(0.1), CompressionLevel::Extreme);
    }

    #[test]
    fn required_blocks_survive_extreme_compression() {
        let noise = "filler text ".repeat(4000);
        let blocks = vec![
            ContentBlock::new("requirements", "- must add the timestamp field").required(),
            block("context", &noise),
            block("code", &noise),
        ];
        let out = Compressor::new().compress(&blocks, 100);
        assert!(
            out.contains("timestamp field") || out.contains("[requirements]"),
            "required block missing from: {}",
            out
        );
    }

    #[test]
    fn output_respects_soft_budget_cap() {
        let noise = "word ".repeat(8000); // ~10k tokens
        let blocks = vec![
            block("issues", &noise),
            block("diff", &noise),
            block("context", &noise),
        ];
        let budget = 1000;
        let out = Compressor::new().compress(&blocks, budget);
        assert!(
            estimate_tokens(&out) <= budget + budget / 5,
            "output {} tokens exceeds soft cap",
            estimate_tokens(&out)
        );
    }

    #[test]
    fn light_collapses_whitespace() {
        let out = compress_light("a\n\n\n\n\nb    c", 1000);
        assert_eq!(out, "a\n\nb c");
    }

    #[test]
    fn medium_drops_comments_but_keeps_markers() {
        let content = "code line\n// plain comment\n// TODO: keep me\n\n# another comment\nreal";
        let out = compress_medium(content, 1000);
        assert!(out.contains("code line"));
        assert!(out.contains("TODO: keep me"));
        assert!(!out.contains("plain comment"));
        assert!(!out.contains("another comment"));
    }

    #[test]
    fn medium_drops_example_prose() {
        let content = "keep this\nfor example, drop this\nAlso e.g. this one goes";
        let out = compress_medium(content, 1000);
        assert_eq!(out, "keep this");
    }

    #[test]
    fn heavy_extracts_code_signatures() {
        let content = "\
func Exported() {\n\tbody := 1\n}\npublic void run() {\n  work();\n}\n@@ -1,3 +1,4 @@\ncontext line\n";
        let b = ContentBlock::new("code", content);
        let out = compress_heavy(&b, 1000);
        assert!(out.contains("func Exported()"));
        assert!(out.contains("public void run()"));
        assert!(out.contains("@@ -1,3 +1,4 @@"));
        assert!(!out.contains("body := 1"));
        assert!(!out.contains("context line"));
    }

    #[test]
    fn heavy_keeps_list_items_for_issues() {
        let content = "preamble\n- first issue\n2. second issue\nnot a list line";
        let b = ContentBlock::new("issues", content);
        let out = compress_heavy(&b, 1000);
        assert_eq!(out, "- first issue\n2. second issue");
    }

    #[test]
    fn extreme_is_one_line_with_type_tag() {
        let b = ContentBlock::new("guidance", "Fix the handler. Then fix the tests.\nMore.");
        let out = summary_line(&b);
        assert_eq!(out, "[guidance] Fix the handler.");
        assert!(out.len() <= 150 + "[guidance] ".len());
    }
}
