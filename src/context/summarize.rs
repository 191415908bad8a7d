//! Language-aware file summarization
//!
//! When a file is too large to hand to an LLM verbatim, we extract its
//! surface: imports, public type declarations with their methods, public
//! function signatures with doc comments, and outstanding TODO markers.
//! This is not parsing in anger - line-oriented regex extraction is enough
//! for a summary, and it degrades gracefully on languages we don't know.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Default threshold below which files are included verbatim
pub const MAX_FULL_FILE_LINES: usize = 200;

/// Source language, detected by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Go,
    Python,
    Ruby,
    JavaScript,
    TypeScript,
    Java,
    Rust,
    Generic,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "go" => Language::Go,
            "py" => Language::Python,
            "rb" => Language::Ruby,
            "js" | "jsx" | "mjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "java" => Language::Java,
            "rs" => Language::Rust,
            _ => Language::Generic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Generic => "text",
        }
    }
}

/// A public type-like declaration and its methods
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub declaration: String,
    pub methods: Vec<String>,
}

/// A public function signature and its doc comment
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub signature: String,
    pub doc: Option<String>,
}

/// Extracted surface of one source file
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: String,
    pub language: Language,
    pub total_lines: usize,
    pub imports: Vec<String>,
    pub types: Vec<TypeDecl>,
    pub functions: Vec<FunctionDecl>,
    pub todos: Vec<String>,
}

/// A file prepared for inclusion in a handoff
#[derive(Debug, Clone)]
pub enum FileContext {
    /// Small file, included verbatim
    Full(String),
    /// Large file, reduced to its surface
    Summary(FileSummary),
}

impl FileContext {
    /// Render within a token budget.
    pub fn render(&self, token_budget: usize) -> String {
        match self {
            FileContext::Full(content) => content.clone(),
            FileContext::Summary(summary) => summary.to_token_budget(token_budget),
        }
    }
}

/// Summarize a file: verbatim when it fits in `max_full_lines`, surface
/// extraction otherwise.
pub fn summarize(path: &Path, content: &str, max_full_lines: usize) -> FileContext {
    let total_lines = content.lines().count();
    if total_lines <= max_full_lines {
        return FileContext::Full(content.to_string());
    }

    let language = Language::from_path(path);
    FileContext::Summary(extract(path, content, language, total_lines))
}

fn extract(path: &Path, content: &str, language: Language, total_lines: usize) -> FileSummary {
    let mut summary = FileSummary {
        path: path.display().to_string(),
        language,
        total_lines,
        imports: Vec::new(),
        types: Vec::new(),
        functions: Vec::new(),
        todos: Vec::new(),
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut last_doc: Option<String> = None;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim_end();
        let trimmed = line.trim_start();

        if let Some(todo) = extract_todo(trimmed) {
            if summary.todos.len() < 20 {
                summary.todos.push(todo);
            }
        }

        if is_import(trimmed, language) {
            summary.imports.push(trimmed.to_string());
            continue;
        }

        if let Some(doc) = doc_comment(trimmed, language) {
            last_doc = Some(match last_doc.take() {
                Some(prev) => format!("{} {}", prev, doc),
                None => doc,
            });
            continue;
        }

        if let Some(decl) = type_decl(line, language) {
            let methods = collect_methods(&lines, i, language);
            summary.types.push(TypeDecl {
                declaration: decl,
                methods,
            });
            last_doc = None;
            continue;
        }

        if let Some(sig) = function_decl(line, language) {
            summary.functions.push(FunctionDecl {
                signature: sig,
                doc: last_doc.take(),
            });
            continue;
        }

        if !trimmed.is_empty() {
            last_doc = None;
        }
    }

    summary
}

fn extract_todo(line: &str) -> Option<String> {
    static TODO: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(TODO|FIXME)\b[:\s]?(.*)").unwrap());
    if !line.starts_with("//") && !line.starts_with('#') && !line.starts_with("/*") {
        return None;
    }
    TODO.captures(line)
        .map(|c| format!("{}: {}", c[1].to_uppercase(), c[2].trim()))
}

fn is_import(line: &str, language: Language) -> bool {
    match language {
        Language::Go => line.starts_with("import ") || line.starts_with("import("),
        Language::Python => line.starts_with("import ") || line.starts_with("from "),
        Language::Ruby => line.starts_with("require ") || line.starts_with("require_relative "),
        Language::JavaScript | Language::TypeScript => {
            line.starts_with("import ") || line.contains("= require(")
        }
        Language::Java => line.starts_with("import "),
        Language::Rust => line.starts_with("use "),
        Language::Generic => false,
    }
}

fn doc_comment(line: &str, language: Language) -> Option<String> {
    let text = match language {
        Language::Rust => line.strip_prefix("///")?,
        Language::Go | Language::JavaScript | Language::TypeScript | Language::Java => {
            line.strip_prefix("//").or_else(|| line.strip_prefix("*"))?
        }
        Language::Python | Language::Ruby => line.strip_prefix('#')?,
        Language::Generic => return None,
    };
    let text = text.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

/// Match an exported/public type-like declaration.
fn type_decl(line: &str, language: Language) -> Option<String> {
    static GO_TYPE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^type\s+([A-Z]\w*)\s+(struct|interface)").unwrap());
    static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^class\s+\w+").unwrap());
    static RB_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(module|class)\s+[A-Z]\w*").unwrap());
    static JS_TYPE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^export\s+(?:default\s+)?(?:abstract\s+)?(class|interface|type|enum)\s+\w+")
            .unwrap()
    });
    static JAVA_TYPE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^public\s+(?:final\s+|abstract\s+)?(class|interface|enum)\s+\w+").unwrap());
    static RUST_TYPE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^pub\s+(struct|enum|trait)\s+\w+").unwrap());

    let matched = match language {
        Language::Go => GO_TYPE.is_match(line),
        Language::Python => PY_CLASS.is_match(line),
        Language::Ruby => RB_TYPE.is_match(line),
        Language::JavaScript | Language::TypeScript => JS_TYPE.is_match(line),
        Language::Java => JAVA_TYPE.is_match(line),
        Language::Rust => RUST_TYPE.is_match(line),
        Language::Generic => false,
    };

    matched.then(|| {
        line.trim()
            .trim_end_matches(['{', ':'])
            .trim()
            .to_string()
    })
}

/// Match an exported/public function signature.
fn function_decl(line: &str, language: Language) -> Option<String> {
    // Receiver methods are collected with their type, not here.
    static GO_FUNC: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^func\s+([A-Z]\w*)\s*\(").unwrap());
    static PY_DEF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^def\s+([a-zA-Z]\w*)\s*\(").unwrap());
    static RB_DEF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^def\s+\w+").unwrap());
    static JS_FUNC: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^export\s+(?:default\s+)?(?:async\s+)?function\s+\w+|^function\s+\w+").unwrap()
    });
    static JAVA_METHOD: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*public\s+(?:static\s+)?[\w<>\[\]]+\s+\w+\s*\(").unwrap()
    });
    static RUST_FN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^pub\s+(?:async\s+)?fn\s+\w+").unwrap());

    let matched = match language {
        Language::Go => GO_FUNC.is_match(line),
        Language::Python => PY_DEF.is_match(line),
        Language::Ruby => RB_DEF.is_match(line),
        Language::JavaScript | Language::TypeScript => JS_FUNC.is_match(line),
        Language::Java => JAVA_METHOD.is_match(line),
        Language::Rust => RUST_FN.is_match(line),
        Language::Generic => false,
    };

    matched.then(|| {
        line.trim()
            .trim_end_matches('{')
            .trim_end_matches(':')
            .trim()
            .to_string()
    })
}

/// Methods declared inside a type body, found by scanning forward from the
/// declaration while indentation (or braces) say we are still inside it.
fn collect_methods(lines: &[&str], decl_index: usize, language: Language) -> Vec<String> {
    static METHOD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s+(?:pub\s+)?(?:async\s+)?(?:def|fn|function)\s+(\w+)|^\s+(?:public|private|protected)\s+[\w<>\[\]]+\s+(\w+)\s*\(").unwrap());

    let mut methods = Vec::new();
    for line in lines.iter().skip(decl_index + 1).take(400) {
        let trimmed = line.trim_start();
        // A new top-level declaration ends the body.
        if !line.starts_with([' ', '\t']) && !trimmed.is_empty() && !trimmed.starts_with('}') {
            match language {
                // Go methods hang off receivers outside the struct body.
                Language::Go => {
                    if let Some(name) = go_method(line) {
                        methods.push(name);
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        if let Some(caps) = METHOD.captures(line) {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string());
            if let Some(name) = name {
                methods.push(name);
            }
        }
        if methods.len() >= 30 {
            break;
        }
    }
    methods
}

fn go_method(line: &str) -> Option<String> {
    static GO_METHOD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^func\s+\([^)]*\)\s+(\w+)\s*\(").unwrap());
    GO_METHOD.captures(line).map(|c| c[1].to_string())
}

impl FileSummary {
    /// Full rendering of the summary.
    pub fn to_summary_string(&self) -> String {
        self.render(true, true)
    }

    /// Render within a token budget, progressively dropping method lists,
    /// then doc comments, then function signatures.
    pub fn to_token_budget(&self, budget: usize) -> String {
        let full = self.render(true, true);
        if super::compress::estimate_tokens(&full) <= budget {
            return full;
        }
        let no_methods = self.render(false, true);
        if super::compress::estimate_tokens(&no_methods) <= budget {
            return no_methods;
        }
        let no_docs = self.render(false, false);
        if super::compress::estimate_tokens(&no_docs) <= budget {
            return no_docs;
        }
        self.header_only()
    }

    fn header(&self) -> String {
        format!(
            "# {} ({}, {} lines, summarized)",
            self.path,
            self.language.name(),
            self.total_lines
        )
    }

    fn header_only(&self) -> String {
        let mut out = self.header();
        if !self.imports.is_empty() {
            out.push_str(&format!("\n{} imports", self.imports.len()));
        }
        out.push('\n');
        out
    }

    fn render(&self, with_methods: bool, with_docs: bool) -> String {
        let mut out = String::new();
        out.push_str(&self.header());
        out.push('\n');

        if !self.imports.is_empty() {
            out.push_str("\nImports:\n");
            for import in &self.imports {
                out.push_str("  ");
                out.push_str(import);
                out.push('\n');
            }
        }

        if !self.types.is_empty() {
            out.push_str("\nTypes:\n");
            for ty in &self.types {
                out.push_str("  ");
                out.push_str(&ty.declaration);
                out.push('\n');
                if with_methods {
                    for method in &ty.methods {
                        out.push_str("    .");
                        out.push_str(method);
                        out.push_str("()\n");
                    }
                }
            }
        }

        if !self.functions.is_empty() {
            out.push_str("\nFunctions:\n");
            for func in &self.functions {
                if with_docs {
                    if let Some(doc) = &func.doc {
                        out.push_str("  // ");
                        out.push_str(doc);
                        out.push('\n');
                    }
                }
                out.push_str("  ");
                out.push_str(&func.signature);
                out.push('\n');
            }
        }

        if !self.todos.is_empty() {
            out.push_str("\nOutstanding:\n");
            for todo in &self.todos {
                out.push_str("  ");
                out.push_str(todo);
                out.push('\n');
            }
        }

        out
    }
}
