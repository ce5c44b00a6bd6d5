//! In-memory status cache.
//!
//! A process-local read-through cache over workflow rows, backed by a
//! concurrent map. Entries are whole `Workflow` records; the engine
//! invalidates after every write, so a hit is never staler than the last
//! completed delivery in this process.

use dashmap::DashMap;
use ledgerflow_core::cache::StatusCache;
use ledgerflow_types::error::CacheError;
use ledgerflow_types::workflow::Workflow;
use std::sync::Arc;
use uuid::Uuid;

/// Concurrent-map cache of workflow records.
#[derive(Clone, Default)]
pub struct MemoryStatusCache {
    entries: Arc<DashMap<Uuid, Workflow>>,
}

impl MemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StatusCache for MemoryStatusCache {
    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, CacheError> {
        Ok(self.entries.get(id).map(|entry| entry.value().clone()))
    }

    async fn set(&self, workflow: &Workflow) -> Result<(), CacheError> {
        self.entries.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn invalidate(&self, id: &Uuid) -> Result<(), CacheError> {
        self.entries.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerflow_types::context::WorkflowContext;
    use ledgerflow_types::workflow::{WorkflowKind, WorkflowStatus};

    fn workflow() -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            kind: WorkflowKind::Redemption,
            status: WorkflowStatus::InProgress,
            client_id: None,
            request_params: WorkflowContext::new(),
            response_data: WorkflowContext::new(),
            unique_hash: "hash".to_string(),
            debug_params: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn set_get_invalidate() {
        let cache = MemoryStatusCache::new();
        let wf = workflow();

        assert!(cache.get(&wf.id).await.unwrap().is_none());

        cache.set(&wf).await.unwrap();
        let hit = cache.get(&wf.id).await.unwrap().unwrap();
        assert_eq!(hit.id, wf.id);
        assert_eq!(hit.kind, WorkflowKind::Redemption);

        cache.invalidate(&wf.id).await.unwrap();
        assert!(cache.get(&wf.id).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn set_replaces_existing_entry() {
        let cache = MemoryStatusCache::new();
        let mut wf = workflow();
        cache.set(&wf).await.unwrap();

        wf.status = WorkflowStatus::Completed;
        cache.set(&wf).await.unwrap();

        let hit = cache.get(&wf.id).await.unwrap().unwrap();
        assert_eq!(hit.status, WorkflowStatus::Completed);
        assert_eq!(cache.len(), 1);
    }
}
