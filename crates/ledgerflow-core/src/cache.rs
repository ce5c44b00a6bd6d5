//! Workflow status cache port.
//!
//! A read-through cache in front of the store's workflow rows. The engine
//! consults it before loading a workflow and invalidates it after every
//! write; entries may be dropped at any time without affecting correctness.

use std::future::Future;

use ledgerflow_types::error::CacheError;
use ledgerflow_types::workflow::Workflow;
use uuid::Uuid;

/// Cache of workflow records keyed by workflow id.
pub trait StatusCache: Send + Sync {
    fn get(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Workflow>, CacheError>> + Send;

    fn set(
        &self,
        workflow: &Workflow,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn invalidate(&self, id: &Uuid) -> impl Future<Output = Result<(), CacheError>> + Send;
}
