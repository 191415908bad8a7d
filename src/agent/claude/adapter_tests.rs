//! Tests for the LLM subprocess adapter
//!
//! The real CLI is not required: a shell script standing in for the binary
//! exercises spawning, stdin delivery, stream parsing, failure
//! classification, and cancellation.

use std::path::Path;
use std::time::Duration;

use super::adapter::{ClaudeAdapter, LlmRequest, OutputFormat};
use crate::agent::{cancel_pair, is_cancellation, is_permanent};
use crate::config::{ClaudeSettings, RetrySettings};
use crate::domain::EventSink;

fn write_script(dir: &Path, body: &str) -> String {
    let path = dir.join("fake-claude");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.display().to_string()
}

fn adapter_for(command: String, max_attempts: u32) -> ClaudeAdapter {
    ClaudeAdapter::new(
        ClaudeSettings {
            command,
            timeout_secs: 0,
            enable_prompt_caching: false,
        },
        RetrySettings {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        },
        EventSink::new(Box::new(std::io::sink())),
    )
}

#[test]
fn build_args_with_agent_and_tools() {
    let adapter = adapter_for("claude".to_string(), 1);
    let mut request = LlmRequest::new("prompt");
    request.agent = Some("peer-review".to_string());
    request.system_prompt = Some("ignored when agent set".to_string());
    request.model = Some("opus".to_string());
    request.output_format = OutputFormat::StreamJson;
    request.enable_tools = true;

    let args = adapter.build_args(&request);
    assert_eq!(
        args,
        vec![
            "-p",
            "--agent",
            "peer-review",
            "--model",
            "opus",
            "--output-format",
            "stream-json",
            "--dangerously-skip-permissions",
        ]
    );
}

#[test]
fn build_args_with_system_prompt() {
    let adapter = adapter_for("claude".to_string(), 1);
    let mut request = LlmRequest::new("prompt");
    request.system_prompt = Some("you are a reviewer".to_string());

    let args = adapter.build_args(&request);
    assert_eq!(
        args,
        vec![
            "-p",
            "--system-prompt",
            "you are a reviewer",
            "--output-format",
            "text",
        ]
    );
}

#[tokio::test]
async fn stream_json_collects_text_and_cost() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(
        dir.path(),
        r#"cat > /dev/null
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hello from the model"}]}}'
echo '{"type":"result","subtype":"success","total_cost_usd":0.01,"duration_ms":5,"usage":{"input_tokens":10,"output_tokens":2}}'"#,
    );

    let adapter = adapter_for(command, 1);
    let mut request = LlmRequest::new("do the thing");
    request.output_format = OutputFormat::StreamJson;

    let (_tx, cancel) = cancel_pair();
    let response = adapter.run(&request, dir.path(), &cancel).await.unwrap();

    assert!(response.text.contains("hello from the model"));
    let cost = response.cost.unwrap();
    assert_eq!(cost.input_tokens, 10);
    assert!((cost.cost_usd - 0.01).abs() < 1e-9);
    assert_eq!(response.duration_ms, Some(5));
}

#[tokio::test]
async fn text_format_collects_stdout_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(dir.path(), "cat > /dev/null\necho 'line one'\necho 'line two'");

    let adapter = adapter_for(command, 1);
    let request = LlmRequest::new("prompt");

    let (_tx, cancel) = cancel_pair();
    let response = adapter.run(&request, dir.path(), &cancel).await.unwrap();
    assert_eq!(response.text, "line one\nline two\n");
}

#[tokio::test]
async fn prompt_arrives_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    // The script echoes its stdin back.
    let command = write_script(dir.path(), "cat");

    let adapter = adapter_for(command, 1);
    let request = LlmRequest::new("the exact prompt text");

    let (_tx, cancel) = cancel_pair();
    let response = adapter.run(&request, dir.path(), &cancel).await.unwrap();
    assert!(response.text.contains("the exact prompt text"));
}

#[tokio::test]
async fn transient_failure_is_retried_then_permanent_failure_is_not() {
    let dir = tempfile::tempdir().unwrap();

    // Fails every time with a retryable message.
    let transient = write_script(dir.path(), "cat > /dev/null\necho 'rate limit' >&2\nexit 1");
    let adapter = adapter_for(transient, 2);
    let (_tx, cancel) = cancel_pair();
    let err = adapter
        .run(&LlmRequest::new("p"), dir.path(), &cancel)
        .await
        .unwrap_err();
    assert!(format!("{}", err).contains("after 2 attempts"));

    // Fails with a non-retryable message: one attempt only.
    let fatal = write_script(dir.path(), "cat > /dev/null\necho 'invalid argument' >&2\nexit 2");
    let adapter = adapter_for(fatal, 3);
    let err = adapter
        .run(&LlmRequest::new("p"), dir.path(), &cancel)
        .await
        .unwrap_err();
    assert!(is_permanent(&err));
}

#[tokio::test]
async fn cancellation_terminates_the_child_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(dir.path(), "cat > /dev/null\nsleep 30");

    let adapter = adapter_for(command, 3);
    let (tx, cancel) = cancel_pair();

    let started = std::time::Instant::now();
    let request = LlmRequest::new("p");
    let run = adapter.run(&request, dir.path(), &cancel);
    tokio::pin!(run);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        _ = &mut run => panic!("should still be running"),
    }
    tx.send(true).unwrap();

    let err = run.await.unwrap_err();
    assert!(is_cancellation(&err), "got: {:#}", err);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancellation took too long"
    );
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_script(dir.path(), "cat > /dev/null\nsleep 30");

    let adapter = ClaudeAdapter::new(
        ClaudeSettings {
            command,
            timeout_secs: 1,
            enable_prompt_caching: false,
        },
        RetrySettings {
            max_attempts: 1,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        },
        EventSink::new(Box::new(std::io::sink())),
    );

    let (_tx, cancel) = cancel_pair();
    let started = std::time::Instant::now();
    let err = adapter
        .run(&LlmRequest::new("p"), dir.path(), &cancel)
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("timed out"));
    assert!(!is_cancellation(&err));
    assert!(started.elapsed() < Duration::from_secs(10));
}
