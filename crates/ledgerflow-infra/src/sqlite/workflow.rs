//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `ledgerflow-core` using sqlx with split
//! read/write pools. Contexts are stored as versioned JSON envelopes and
//! timestamps as RFC 3339 strings. Two schema details carry the engine's
//! idempotency guarantees: the partial unique index on
//! `workflow_steps.unique_hash` (live rows only) and the per-workflow
//! `sequence` column assigned by a subselect on the single-writer pool.

use chrono::{DateTime, Utc};
use ledgerflow_core::repository::{NewStep, NewWorkflow, StepResult, WorkflowStore};
use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::error::RepositoryError;
use ledgerflow_types::workflow::{
    StepKind, StepStatus, Workflow, WorkflowKind, WorkflowStatus, WorkflowStep,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    kind: String,
    status: String,
    client_id: Option<String>,
    request_params: String,
    response_data: String,
    unique_hash: String,
    debug_params: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            client_id: row.try_get("client_id")?,
            request_params: row.try_get("request_params")?,
            response_data: row.try_get("response_data")?,
            unique_hash: row.try_get("unique_hash")?,
            debug_params: row.try_get("debug_params")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let kind = WorkflowKind::parse(&self.kind)
            .ok_or_else(|| RepositoryError::Query(format!("invalid workflow kind: {}", self.kind)))?;
        let status = WorkflowStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Query(format!("invalid workflow status: {}", self.status))
        })?;
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            kind,
            status,
            client_id: self.client_id.as_deref().map(parse_uuid).transpose()?,
            request_params: parse_context(&self.request_params)?,
            response_data: parse_context(&self.response_data)?,
            unique_hash: self.unique_hash,
            debug_params: self.debug_params.as_deref().map(parse_json).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct StepRow {
    id: String,
    workflow_id: String,
    kind: String,
    status: String,
    sequence: i64,
    request_params: String,
    response_data: String,
    transaction_hash: Option<String>,
    unique_hash: String,
    debug_params: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            sequence: row.try_get("sequence")?,
            request_params: row.try_get("request_params")?,
            response_data: row.try_get("response_data")?,
            transaction_hash: row.try_get("transaction_hash")?,
            unique_hash: row.try_get("unique_hash")?,
            debug_params: row.try_get("debug_params")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_step(self) -> Result<WorkflowStep, RepositoryError> {
        let kind = StepKind::parse(&self.kind)
            .ok_or_else(|| RepositoryError::Query(format!("invalid step kind: {}", self.kind)))?;
        let status = StepStatus::parse(&self.status)
            .ok_or_else(|| RepositoryError::Query(format!("invalid step status: {}", self.status)))?;
        Ok(WorkflowStep {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            kind,
            status,
            sequence: self.sequence,
            request_params: parse_context(&self.request_params)?,
            response_data: parse_context(&self.response_data)?,
            transaction_hash: self.transaction_hash,
            unique_hash: self.unique_hash,
            debug_params: self.debug_params.as_deref().map(parse_json).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid timestamp: {e}")))
}

fn parse_context(s: &str) -> Result<WorkflowContext, RepositoryError> {
    WorkflowContext::from_json(s)
        .map_err(|e| RepositoryError::Query(format!("invalid context: {e}")))
}

fn parse_json(s: &str) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid JSON: {e}")))
}

fn map_unique_violation(e: sqlx::Error, detail: String) -> RepositoryError {
    match e {
        sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE") => {
            RepositoryError::Conflict(detail)
        }
        e => RepositoryError::Query(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// WorkflowStore implementation
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, RepositoryError> {
        let now = Utc::now();
        let response_data = WorkflowContext::new();
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, kind, status, client_id, request_params, response_data,
                 unique_hash, debug_params, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(new.id.to_string())
        .bind(new.kind.as_str())
        .bind(WorkflowStatus::InProgress.as_str())
        .bind(new.client_id.map(|id| id.to_string()))
        .bind(new.request_params.to_json())
        .bind(response_data.to_json())
        .bind(&new.unique_hash)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            map_unique_violation(e, format!("workflow hash '{}' already exists", new.unique_hash))
        })?;

        Ok(Workflow {
            id: new.id,
            kind: new.kind,
            status: WorkflowStatus::InProgress,
            client_id: new.client_id,
            request_params: new.request_params,
            response_data,
            unique_hash: new.unique_hash,
            debug_params: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| WorkflowRow::from_row(&r).map_err(|e| RepositoryError::Query(e.to_string())))
            .transpose()?
            .map(WorkflowRow::into_workflow)
            .transpose()
    }

    async fn update_workflow_status(
        &self,
        id: &Uuid,
        status: WorkflowStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn merge_workflow_response(
        &self,
        id: &Uuid,
        response: &WorkflowContext,
    ) -> Result<(), RepositoryError> {
        // Read-merge-write in one transaction on the single-writer pool so
        // concurrent merges cannot lose keys.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let stored: Option<(String,)> =
            sqlx::query_as("SELECT response_data FROM workflows WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let (stored,) = stored.ok_or(RepositoryError::NotFound)?;

        let mut merged = parse_context(&stored)?;
        merged.merge_preserving(response);

        sqlx::query("UPDATE workflows SET response_data = ?, updated_at = ? WHERE id = ?")
            .bind(merged.to_json())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn insert_step(&self, new: NewStep) -> Result<WorkflowStep, RepositoryError> {
        let now = Utc::now();
        let response_data = WorkflowContext::new();
        // The sequence subselect is race-free because the writer pool holds
        // a single connection.
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, kind, status, sequence, request_params,
                 response_data, transaction_hash, unique_hash, debug_params,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?,
                    (SELECT COALESCE(MAX(sequence), 0) + 1
                       FROM workflow_steps WHERE workflow_id = ?),
                    ?, ?, NULL, ?, NULL, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(new.id.to_string())
        .bind(new.workflow_id.to_string())
        .bind(new.kind.as_str())
        .bind(new.status.as_str())
        .bind(new.workflow_id.to_string())
        .bind(new.request_params.to_json())
        .bind(response_data.to_json())
        .bind(&new.unique_hash)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool.writer)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                format!("step '{}' already scheduled for workflow {}", new.kind, new.workflow_id),
            )
        })?;
        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(WorkflowStep {
            id: new.id,
            workflow_id: new.workflow_id,
            kind: new.kind,
            status: new.status,
            sequence,
            request_params: new.request_params,
            response_data,
            transaction_hash: None,
            unique_hash: new.unique_hash,
            debug_params: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_step(&self, id: &Uuid) -> Result<Option<WorkflowStep>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_steps WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.map(|r| StepRow::from_row(&r).map_err(|e| RepositoryError::Query(e.to_string())))
            .transpose()?
            .map(StepRow::into_step)
            .transpose()
    }

    async fn steps_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_steps
            WHERE workflow_id = ? AND status != 'retried'
            ORDER BY sequence
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                StepRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_step()
            })
            .collect()
    }

    async fn mark_step_pending(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        // Atomic claim: only an executable row transitions. Zero affected
        // rows means a stale or duplicate delivery.
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps SET status = 'pending', updated_at = ?
            WHERE id = ? AND status IN ('queued', 'pending')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_step_result(&self, id: &Uuid, result: StepResult) -> Result<(), RepositoryError> {
        let outcome = sqlx::query(
            r#"
            UPDATE workflow_steps SET
                status = ?,
                response_data = COALESCE(?, response_data),
                transaction_hash = COALESCE(?, transaction_hash),
                debug_params = COALESCE(?, debug_params),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(result.status.as_str())
        .bind(result.response_data.map(|c| c.to_json()))
        .bind(result.transaction_hash)
        .bind(result.debug_params.map(|v| v.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        if outcome.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_steps_retried(
        &self,
        workflow_id: &Uuid,
        from_sequence: i64,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps SET status = 'retried', updated_at = ?
            WHERE workflow_id = ? AND sequence >= ? AND status != 'retried'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(workflow_id.to_string())
        .bind(from_sequence)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
