//! Infrastructure layer for Ledgerflow.
//!
//! Contains implementations of the ports defined in `ledgerflow-core`:
//! the SQLite workflow store, the in-memory status cache, and the
//! in-process message queue with its delivery worker, plus the
//! configuration loader.

pub mod cache;
pub mod config;
pub mod queue;
pub mod sqlite;
