//! Persistence ports implemented by the infrastructure layer.

pub mod workflow;

pub use workflow::{NewStep, NewWorkflow, StepResult, WorkflowStore};
