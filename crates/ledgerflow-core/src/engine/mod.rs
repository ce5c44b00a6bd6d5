//! The workflow engine.
//!
//! - `registry` -- typed step-kind -> handler table built at startup.
//! - `pipeline` -- the message-driven executor advancing a workflow by one
//!   step per delivery.

pub mod pipeline;
pub mod registry;

pub use pipeline::{EngineError, PerformReceipt, WorkflowEngine};
pub use registry::HandlerRegistry;
