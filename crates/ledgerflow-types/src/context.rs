//! Versioned workflow context.
//!
//! Steps accumulate structured context as a workflow advances: each step's
//! `response_data` is merged into its dependents' `request_params`, and
//! front-end-visible results accumulate on the workflow row. The context is
//! a versioned JSON object validated at every read/write boundary instead
//! of a duck-typed blob.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Context schema version written by this build. Bumped when the envelope
/// shape changes.
pub const CONTEXT_VERSION: u16 = 1;

/// Errors from context validation at read/write boundaries.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unsupported context version {0} (supported: {CONTEXT_VERSION})")]
    UnsupportedVersion(u16),

    #[error("context payload is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("invalid context JSON: {0}")]
    InvalidJson(String),
}

/// Versioned key/value context carried by workflows and steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    version: u16,
    data: Map<String, Value>,
}

impl WorkflowContext {
    /// Empty context at the current version.
    pub fn new() -> Self {
        Self {
            version: CONTEXT_VERSION,
            data: Map::new(),
        }
    }

    /// Build a context from raw key/value pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            version: CONTEXT_VERSION,
            data: pairs.into_iter().collect(),
        }
    }

    /// Validate and deserialize a stored context value.
    ///
    /// Accepts either a full envelope `{version, data}` or `null` (treated
    /// as empty, for rows written before any step produced output).
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        if value.is_null() {
            return Ok(Self::new());
        }
        let ctx: WorkflowContext = serde_json::from_value(value.clone())
            .map_err(|_| ContextError::NotAnObject(value.to_string()))?;
        ctx.validate()?;
        Ok(ctx)
    }

    /// Validate and parse a stored JSON string.
    pub fn from_json(json: &str) -> Result<Self, ContextError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ContextError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Check the envelope version.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.version != CONTEXT_VERSION {
            return Err(ContextError::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    /// Serialize to the stored envelope form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Serialize to a JSON string for storage.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Merge `other` into `self`; on key conflict the incoming value wins.
    /// Nested objects are merged recursively. Used when assembling a step's
    /// request params from its data dependencies.
    pub fn merge(&mut self, other: &WorkflowContext) {
        for (key, value) in &other.data {
            merge_value(&mut self.data, key, value, true);
        }
    }

    /// Merge `other` into `self`; on key conflict the existing value wins.
    /// Used for workflow-level `response_data` accumulation, which must
    /// never overwrite earlier results.
    pub fn merge_preserving(&mut self, other: &WorkflowContext) {
        for (key, value) in &other.data {
            merge_value(&mut self.data, key, value, false);
        }
    }
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_value(target: &mut Map<String, Value>, key: &str, incoming: &Value, incoming_wins: bool) {
    match (target.get_mut(key), incoming) {
        (Some(Value::Object(existing)), Value::Object(new)) => {
            for (k, v) in new {
                merge_value(existing, k, v, incoming_wins);
            }
        }
        (Some(existing), _) => {
            if incoming_wins {
                *existing = incoming.clone();
            }
        }
        (None, _) => {
            target.insert(key.to_string(), incoming.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
