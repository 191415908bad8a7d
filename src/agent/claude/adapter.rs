//! LLM subprocess invocation
//!
//! The adapter owns everything about talking to the external LLM CLI:
//! argument construction from configuration, the prompt on stdin, NDJSON
//! stream parsing, cancellation (SIGTERM, then SIGKILL after a short
//! grace), per-call timeout, and retry classification of failures. The
//! subprocess always runs with the worktree as its working directory; the
//! parent process's working directory is never touched.

use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use super::output::{ContentBlock, StreamEvent};
use super::tool_format::format_tool_call;
use crate::agent::cost::CostSample;
use crate::agent::retry::{is_retryable_message, permanent, with_retry};
use crate::agent::{AgentError, CancelSignal};
use crate::config::{ClaudeSettings, RetrySettings};
use crate::domain::{EventSink, PipelineEvent};

/// How the subprocess's stdout is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text, collected verbatim (parsed verdicts)
    Text,
    /// NDJSON stream with tool-call activity
    StreamJson,
}

impl OutputFormat {
    fn flag_value(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::StreamJson => "stream-json",
        }
    }
}

/// One LLM invocation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// User prompt, passed on stdin
    pub prompt: String,

    /// System prompt, passed via flag when no agent/skill is named
    pub system_prompt: Option<String>,

    /// Agent/skill name, e.g. the review skill
    pub agent: Option<String>,

    pub model: Option<String>,

    pub output_format: OutputFormat,

    /// Allow unattended tool execution
    pub enable_tools: bool,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            agent: None,
            model: None,
            output_format: OutputFormat::Text,
            enable_tools: false,
        }
    }
}

/// What came back from an invocation
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Accumulated text output
    pub text: String,

    /// Usage metadata, when the protocol emitted it
    pub cost: Option<CostSample>,

    pub duration_ms: Option<u64>,
}

/// The LLM subprocess supervisor
pub struct ClaudeAdapter {
    claude: ClaudeSettings,
    retry: RetrySettings,
    events: EventSink,
}

impl ClaudeAdapter {
    pub fn new(claude: ClaudeSettings, retry: RetrySettings, events: EventSink) -> Self {
        Self {
            claude,
            retry,
            events,
        }
    }

    /// Check that the configured binary exists on PATH.
    pub fn is_available(&self) -> bool {
        std::process::Command::new("which")
            .arg(&self.claude.command)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Build command arguments from configuration and the request.
    pub(super) fn build_args(&self, request: &LlmRequest) -> Vec<String> {
        let mut args = vec!["-p".to_string()];

        if let Some(agent) = &request.agent {
            args.push("--agent".to_string());
            args.push(agent.clone());
        } else if let Some(system_prompt) = &request.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }

        if let Some(model) = &request.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("--output-format".to_string());
        args.push(request.output_format.flag_value().to_string());

        if request.enable_tools {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args
    }

    /// Invoke the subprocess with retry. Cancellation and argument errors
    /// are permanent; timeouts and transient server errors are retried.
    pub async fn run(
        &self,
        request: &LlmRequest,
        workdir: &Path,
        cancel: &CancelSignal,
    ) -> Result<LlmResponse> {
        with_retry(&self.retry, "llm invocation", || {
            self.run_once(request, workdir, cancel.clone())
        })
        .await
    }

    async fn run_once(
        &self,
        request: &LlmRequest,
        workdir: &Path,
        mut cancel: CancelSignal,
    ) -> Result<LlmResponse> {
        let args = self.build_args(request);

        let mut command = Command::new(&self.claude.command);
        command
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.claude.enable_prompt_caching {
            command.env("DISABLE_PROMPT_CACHING", "1");
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.claude.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .context("Failed to write prompt to llm stdin")?;
            // Dropping stdin closes the pipe and signals end of prompt.
        }

        let stderr = child.stderr.take().expect("stderr not captured");
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!("llm stderr: {}", line);
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let stdout = child.stdout.take().expect("stdout not captured");
        let mut reader = BufReader::new(stdout).lines();

        let mut response = LlmResponse::default();
        let mut result_success: Option<bool> = None;
        let deadline = self
            .claude
            .timeout()
            .map(|t| tokio::time::Instant::now() + t);
        let mut cancel_live = true;

        loop {
            let next = tokio::select! {
                changed = cancel.changed(), if cancel_live => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            terminate(&mut child).await;
                            stderr_task.abort();
                            return Err(permanent(anyhow!(AgentError::Cancelled)));
                        }
                        Ok(()) => continue,
                        Err(_) => {
                            // Cancel source is gone; stop polling it.
                            cancel_live = false;
                            continue;
                        }
                    }
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    terminate(&mut child).await;
                    stderr_task.abort();
                    bail!(
                        "llm invocation timed out after {:?}",
                        self.claude.timeout().unwrap_or_default()
                    );
                }
                line = reader.next_line() => {
                    line.context("Failed to read llm stdout")?
                }
            };

            let Some(line) = next else { break };

            match request.output_format {
                OutputFormat::Text => {
                    response.text.push_str(&line);
                    response.text.push('\n');
                }
                OutputFormat::StreamJson => {
                    self.consume_stream_line(&line, &mut response, &mut result_success);
                }
            }
        }

        let status = child.wait().await.context("Failed to wait for llm subprocess")?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() && result_success != Some(true) {
            let message = format!(
                "llm subprocess exited with {}: {}",
                status,
                stderr_text.trim()
            );
            if is_retryable_message(&message) {
                bail!(message);
            }
            return Err(permanent(anyhow!(message)));
        }

        Ok(response)
    }

    fn consume_stream_line(
        &self,
        line: &str,
        response: &mut LlmResponse,
        result_success: &mut Option<bool>,
    ) {
        let Some(event) = StreamEvent::parse(line) else {
            tracing::debug!("Unparsed stream line: {}", line);
            return;
        };

        match &event {
            StreamEvent::System { subtype, message, .. } => {
                tracing::debug!("llm system {}: {}", subtype, message.as_deref().unwrap_or(""));
            }
            StreamEvent::Assistant { message } => {
                for block in &message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            response.text.push_str(text);
                            response.text.push('\n');
                        }
                        ContentBlock::Thinking { thinking } => {
                            let line = thinking.lines().next().unwrap_or("");
                            self.events
                                .emit(&PipelineEvent::progress(format!("Thinking: {}", line)));
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            self.events
                                .emit(&PipelineEvent::progress(format_tool_call(name, input)));
                        }
                        ContentBlock::ToolResult { .. } => {}
                    }
                }
            }
            StreamEvent::User { .. } => {}
            StreamEvent::Result {
                subtype,
                result,
                duration_ms,
                ..
            } => {
                *result_success = Some(subtype == "success");
                response.duration_ms = *duration_ms;
                response.cost = event.cost_sample();
                if response.text.is_empty() {
                    if let Some(result) = result {
                        response.text = result.clone();
                    }
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// SIGTERM, short grace, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(Duration::from_millis(500), child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
    }
    let _ = child.kill().await;
}
