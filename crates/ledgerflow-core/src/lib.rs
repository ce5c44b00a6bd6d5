//! Workflow engine core for Ledgerflow.
//!
//! This crate defines the engine and its "ports": the `WorkflowStore`,
//! `StatusCache`, and `StepPublisher` traits that the infrastructure layer
//! implements, plus the `StepHandler` contract for pluggable business
//! steps. It depends only on `ledgerflow-types` -- never on a database,
//! cache, or queue crate.

pub mod cache;
pub mod engine;
pub mod graph;
pub mod handler;
pub mod queue;
pub mod repository;
