//! SQLite-backed persistence.
//!
//! - `pool` -- split reader/writer WAL pools and migrations.
//! - `workflow` -- the `WorkflowStore` implementation.

pub mod pool;
pub mod workflow;

pub use pool::DatabasePool;
pub use workflow::SqliteWorkflowStore;
