//! Ticket-tracker client (Linear GraphQL)
//!
//! A thin wrapper over the upstream service: one query, strict error
//! classification. 5xx and transport failures retry; 4xx (bad key, unknown
//! ticket) is permanent. The blocking HTTP call runs on the blocking pool
//! so the pipeline driver is never stalled.

use anyhow::{Context, Result, anyhow};
use std::time::Duration;

use crate::agent::{permanent, with_retry};
use crate::config::RetrySettings;
use crate::domain::Task;

const LINEAR_ENDPOINT: &str = "https://api.linear.app/graphql";

/// Default upstream timeout.
const API_TIMEOUT: Duration = Duration::from_secs(30);

const ISSUE_QUERY: &str = "\
query Issue($id: String!) {
  issue(id: $id) {
    id
    identifier
    title
    description
    branchName
    priority
    state { name }
    labels { nodes { name } }
  }
}";

/// Linear API client
#[derive(Clone)]
pub struct LinearClient {
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl LinearClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: LINEAR_ENDPOINT.to_string(),
            timeout: API_TIMEOUT,
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Fetch a ticket and shape it into a task, with retry.
    pub async fn fetch_ticket(&self, identifier: &str, retry: &RetrySettings) -> Result<Task> {
        let client = self.clone();
        let identifier = identifier.to_string();

        with_retry(retry, "ticket fetch", move || {
            let client = client.clone();
            let identifier = identifier.clone();
            async move {
                tokio::task::spawn_blocking(move || client.fetch_blocking(&identifier))
                    .await
                    .context("ticket fetch task panicked")?
            }
        })
        .await
    }

    fn fetch_blocking(&self, identifier: &str) -> Result<Task> {
        let body = serde_json::json!({
            "query": ISSUE_QUERY,
            "variables": { "id": identifier },
        });

        let response = ureq::post(&self.endpoint)
            .set("Authorization", &self.api_key)
            .set("Content-Type", "application/json")
            .timeout(self.timeout)
            .send_json(body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response
                    .into_string()
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                let err = anyhow!("ticket tracker returned HTTP {}: {}", code, detail);
                if (400..500).contains(&code) {
                    return Err(permanent(err));
                }
                return Err(err);
            }
            Err(transport) => {
                return Err(anyhow!(transport).context("ticket tracker unreachable"));
            }
        };

        let payload: serde_json::Value = response
            .into_json()
            .context("Failed to parse ticket tracker response")?;

        parse_ticket(identifier, &payload)
    }
}

/// Shape a GraphQL response into a task. A null issue means the ticket
/// does not exist, which is permanent.
fn parse_ticket(identifier: &str, payload: &serde_json::Value) -> Result<Task> {
    if let Some(errors) = payload.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let message = errors[0]
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown GraphQL error");
            return Err(permanent(anyhow!("ticket tracker rejected query: {}", message)));
        }
    }

    let issue = payload
        .pointer("/data/issue")
        .filter(|v| !v.is_null())
        .ok_or_else(|| permanent(anyhow!("ticket not found: {}", identifier)))?;

    let get_str = |key: &str| issue.get(key).and_then(|v| v.as_str());

    let labels = issue
        .pointer("/labels/nodes")
        .and_then(|n| n.as_array())
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("name").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(Task::from_ticket(
        get_str("identifier").unwrap_or(identifier),
        get_str("title").unwrap_or_default(),
        get_str("description").unwrap_or_default(),
        get_str("branchName").map(|s| s.to_string()),
        labels,
    ))
}
