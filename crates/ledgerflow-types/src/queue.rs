//! Queue message envelope for "step ready" deliveries.
//!
//! Wire schema (camelCase JSON):
//!
//! ```json
//! {
//!   "topics": ["workflow.economy_setup"],
//!   "publisher": "ledgerflow",
//!   "message": {
//!     "kind": "background_job",
//!     "payload": {
//!       "stepKind": "generate_token_addresses",
//!       "taskStatus": "taskReadyToStart",
//!       "currentStepId": "0193...",
//!       "workflowId": "0193...",
//!       "isRetrialAttempt": 0
//!     }
//!   }
//! }
//! ```
//!
//! Delivery is at-least-once; consumers must tolerate duplicates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::StepKind;

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Execution phase carried in a delivery.
///
/// `ReadyToStart` asks the engine to run the step's handler; `Done` /
/// `Failed` report an externally observed outcome (e.g. a transaction
/// confirmation callback) for a step already marked pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "taskReadyToStart")]
    ReadyToStart,
    #[serde(rename = "taskDone")]
    Done,
    #[serde(rename = "taskFailed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::ReadyToStart => "taskReadyToStart",
            TaskStatus::Done => "taskDone",
            TaskStatus::Failed => "taskFailed",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Top-level queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEnvelope {
    /// Routing topics, e.g. `workflow.economy_setup`.
    pub topics: Vec<String>,
    /// Name of the publishing component.
    pub publisher: String,
    /// The enclosed message.
    pub message: QueueMessage,
}

/// Message kinds carried on the queue. Only background jobs today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    BackgroundJob,
}

/// The message body: kind tag plus step payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub kind: MessageKind,
    pub payload: StepPayload,
}

/// Step-ready payload delivered to queue workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPayload {
    /// The step to advance.
    pub step_kind: StepKind,
    /// Execution phase for this delivery.
    pub task_status: TaskStatus,
    /// The step row this delivery targets, when already created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<Uuid>,
    /// The owning workflow, when already created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// 1 when this delivery re-executes a rolled-back step.
    #[serde(default)]
    pub is_retrial_attempt: u8,
}

/// Build a "step ready" envelope for a freshly inserted step row.
pub fn step_ready(
    topic: impl Into<String>,
    publisher: impl Into<String>,
    step_kind: StepKind,
    workflow_id: Uuid,
    current_step_id: Uuid,
    is_retrial: bool,
) -> QueueEnvelope {
    QueueEnvelope {
        topics: vec![topic.into()],
        publisher: publisher.into(),
        message: QueueMessage {
            kind: MessageKind::BackgroundJob,
            payload: StepPayload {
                step_kind,
                task_status: TaskStatus::ReadyToStart,
                current_step_id: Some(current_step_id),
                workflow_id: Some(workflow_id),
                is_retrial_attempt: u8::from(is_retrial),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
