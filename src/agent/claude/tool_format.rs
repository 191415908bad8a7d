//! Human-readable rendering of streamed tool calls

/// Format a tool call for progress display.
pub fn format_tool_call(name: &str, input: &serde_json::Value) -> String {
    let str_field = |key: &str| input.get(key).and_then(|v| v.as_str());

    match name.to_lowercase().as_str() {
        "read" => match str_field("file_path") {
            Some(path) => format!("Read {}", path),
            None => "Read file".to_string(),
        },
        "write" => match str_field("file_path") {
            Some(path) => format!("Write {}", path),
            None => "Write file".to_string(),
        },
        "edit" => match str_field("file_path") {
            Some(path) => format!("Edit {}", path),
            None => "Edit file".to_string(),
        },
        "bash" => match str_field("command") {
            Some(cmd) => format!("Bash: {}", truncate(cmd, 120)),
            None => "Bash command".to_string(),
        },
        "glob" => match str_field("pattern") {
            Some(pattern) => format!("Glob: {}", pattern),
            None => "Glob search".to_string(),
        },
        "grep" => match str_field("pattern") {
            Some(pattern) => format!("Grep: {}", pattern),
            None => "Grep search".to_string(),
        },
        "task_completed" => "Task completed".to_string(),
        _ => name.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tools_render_their_argument() {
        assert_eq!(
            format_tool_call("Read", &serde_json::json!({"file_path": "src/lib.rs"})),
            "Read src/lib.rs"
        );
        assert_eq!(
            format_tool_call("Bash", &serde_json::json!({"command": "cargo test"})),
            "Bash: cargo test"
        );
        assert_eq!(
            format_tool_call("Grep", &serde_json::json!({"pattern": "fn main"})),
            "Grep: fn main"
        );
    }

    #[test]
    fn unknown_tools_fall_back_to_their_name() {
        assert_eq!(
            format_tool_call("WebSearch", &serde_json::Value::Null),
            "WebSearch"
        );
    }

    #[test]
    fn long_commands_are_truncated() {
        let cmd = "x".repeat(300);
        let out = format_tool_call("Bash", &serde_json::json!({ "command": cmd }));
        assert!(out.chars().count() <= "Bash: ".len() + 121);
        assert!(out.ends_with('…'));
    }
}
