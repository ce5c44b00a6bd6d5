//! Engine configuration.
//!
//! Deserialized from `config.toml` in the data directory by the
//! infrastructure layer; every field has a default so a missing or partial
//! file still yields a usable configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the workflow engine and its queue worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Topic prefix for step-ready messages; the workflow kind is appended.
    pub topic_prefix: String,
    /// Publisher name stamped on every envelope.
    pub publisher: String,
    /// In-process queue capacity.
    pub queue_capacity: usize,
    /// Maximum redeliveries for a message whose processing failed with a
    /// retryable error.
    pub max_redeliveries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "workflow".to_string(),
            publisher: "ledgerflow".to_string(),
            queue_capacity: 1024,
            max_redeliveries: 3,
        }
    }
}

impl EngineConfig {
    /// Full topic for a workflow kind, e.g. `workflow.economy_setup`.
    pub fn topic_for(&self, kind: crate::workflow::WorkflowKind) -> String {
        format!("{}.{}", self.topic_prefix, kind.as_str())
    }
}
