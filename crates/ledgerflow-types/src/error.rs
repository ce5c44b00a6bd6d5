use thiserror::Error;

/// Errors from store operations (used by trait definitions in ledgerflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    /// Unique-constraint violation. For step insertion this means "already
    /// scheduled" and callers treat it as a success no-op.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether this error is a uniqueness conflict rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict(_))
    }
}

/// Errors from the status cache. The cache is opportunistic; callers may
/// ignore read failures and fall through to the store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Errors publishing a step-ready message.
///
/// A publish failure after a successful step insert is a hard error: the
/// row exists but nothing will pick it up without an external reaper.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("queue is closed")]
    Closed,

    #[error("queue is full")]
    Full,

    #[error("publish failed: {0}")]
    Backend(String),
}
