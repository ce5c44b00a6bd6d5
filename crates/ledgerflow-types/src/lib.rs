//! Shared domain types for the Ledgerflow workflow engine.
//!
//! This crate contains the core domain types used across the platform:
//! workflows, workflow steps, step graph routing kinds, the versioned
//! workflow context, queue message envelopes, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! sha2.

pub mod config;
pub mod context;
pub mod error;
pub mod queue;
pub mod workflow;
