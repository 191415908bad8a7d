//! Structured progress events
//!
//! Every pipeline stage announces itself on an NDJSON stream: one JSON
//! object per line, flushed immediately so downstream consumers (IDE
//! extensions, log collectors) see progress in real time.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};

use super::review::Issue;

/// Optional payload attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<Issue>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refactor_diff: Option<String>,
}

impl EventData {
    fn is_empty(&self) -> bool {
        self == &EventData::default()
    }
}

/// One line on the event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A stage agent began
    AgentStarted {
        id: String,
        name: String,
        description: String,
    },

    /// A stage agent finished
    AgentCompleted {
        id: String,
        name: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<EventData>,
    },

    /// Free-form progress message
    Progress { message: String },

    /// The task was resolved from its source
    TaskCreated {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Task state changed mid-run
    TaskUpdated {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl PipelineEvent {
    pub fn started(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::AgentStarted {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn completed(id: impl Into<String>, name: impl Into<String>, success: bool) -> Self {
        Self::AgentCompleted {
            id: id.into(),
            name: name.into(),
            status: if success { "success" } else { "failed" }.to_string(),
            data: None,
        }
    }

    pub fn completed_with(
        id: impl Into<String>,
        name: impl Into<String>,
        success: bool,
        data: EventData,
    ) -> Self {
        Self::AgentCompleted {
            id: id.into(),
            name: name.into(),
            status: if success { "success" } else { "failed" }.to_string(),
            data: if data.is_empty() { None } else { Some(data) },
        }
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
        }
    }
}

/// Shared writer for the event stream.
///
/// Cloneable; every clone appends to the same underlying writer. Writes are
/// line-buffered by hand: serialize, newline, flush.
#[derive(Clone)]
pub struct EventSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl EventSink {
    /// Sink that publishes to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(std::io::stdout()))),
        }
    }

    /// Sink over an arbitrary writer (used by tests).
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Emit one event. Serialization failures are impossible for our event
    /// types; write failures are logged and swallowed so a closed consumer
    /// never takes down the pipeline.
    pub fn emit(&self, event: &PipelineEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            tracing::warn!("Failed to write event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::review::Severity;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn events_serialize_one_per_line() {
        let buf = SharedBuf::default();
        let sink = EventSink::new(Box::new(buf.clone()));

        sink.emit(&PipelineEvent::started("execute-t1", "executor", "apply the plan"));
        sink.emit(&PipelineEvent::progress("Review & refactor iteration 1 of 3"));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"agent_started\""));
        assert!(lines[1].contains("\"type\":\"progress\""));
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = PipelineEvent::completed_with(
            "review-1-t1",
            "reviewer",
            false,
            EventData {
                issues: Some(vec![Issue::new(Severity::Major, "missing timestamp field")]),
                feedback: Some("add the field".into()),
                ..Default::default()
            },
        );

        let line = serde_json::to_string(&event).unwrap();
        let parsed: PipelineEvent = serde_json::from_str(&line).unwrap();
        let reserialized = serde_json::to_string(&parsed).unwrap();
        assert_eq!(line, reserialized);
    }

    #[test]
    fn empty_data_is_omitted() {
        let event = PipelineEvent::completed_with("a", "b", true, EventData::default());
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains("data"));
    }
}
