//! Cost and token accounting
//!
//! Usage metadata reported by the LLM protocol is recorded per pipeline
//! stage and printed as a table at the end of the run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One usage report from an LLM invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSample {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl CostSample {
    fn add(&mut self, other: &CostSample) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Thread-safe per-stage cost aggregation
#[derive(Debug, Default)]
pub struct CostTracker {
    stages: Mutex<BTreeMap<String, CostSample>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample against a stage name.
    pub fn record(&self, stage: &str, sample: CostSample) {
        let mut stages = self.stages.lock().unwrap_or_else(|p| p.into_inner());
        stages.entry(stage.to_string()).or_default().add(&sample);
    }

    /// Aggregate across all stages.
    pub fn total(&self) -> CostSample {
        let stages = self.stages.lock().unwrap_or_else(|p| p.into_inner());
        let mut total = CostSample::default();
        for sample in stages.values() {
            total.add(sample);
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.stages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty()
    }

    /// Formatted table for end-of-run reporting.
    pub fn format_table(&self) -> String {
        let stages = self.stages.lock().unwrap_or_else(|p| p.into_inner());

        let mut out = String::new();
        out.push_str(&format!(
            "{:<14} {:>10} {:>10} {:>12} {:>12} {:>10}\n",
            "stage", "input", "output", "cache read", "cache write", "cost"
        ));

        let mut total = CostSample::default();
        for (stage, sample) in stages.iter() {
            total.add(sample);
            out.push_str(&format!(
                "{:<14} {:>10} {:>10} {:>12} {:>12} {:>9.4}$\n",
                stage,
                sample.input_tokens,
                sample.output_tokens,
                sample.cache_read_tokens,
                sample.cache_write_tokens,
                sample.cost_usd
            ));
        }
        out.push_str(&format!(
            "{:<14} {:>10} {:>10} {:>12} {:>12} {:>9.4}$\n",
            "total",
            total.input_tokens,
            total.output_tokens,
            total.cache_read_tokens,
            total.cache_write_tokens,
            total.cost_usd
        ));
        out
    }
}
