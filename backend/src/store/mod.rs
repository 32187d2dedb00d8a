// Record Store - persistence boundary for the automation core
//
// Every component talks to storage through `RecordStore`, so the same code
// runs against PostgreSQL in production and the in-memory store in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldflow_shared::{
    AgentExecution, AgentExecutionStats, EntityKind, EntityState, ExecutionStatus, NotificationRecord,
    TaskRecord, UnknownVariant, WorkflowExecution, WorkflowStepRecord,
};
use uuid::Uuid;

use crate::rules::Rule;
use crate::workflows::WorkflowDefinition;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("{0} not found")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ===== Workflow definitions =====

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;

    /// Active workflows listening for `event`.
    async fn workflows_for_event(&self, event: &str) -> StoreResult<Vec<WorkflowDefinition>>;

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()>;

    // ===== Executions =====

    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()>;

    /// Move a running execution to a terminal status. Returns false when it
    /// was not running, leaving the record untouched.
    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> StoreResult<bool>;

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;

    // ===== Step records =====

    async fn insert_step(&self, step: &WorkflowStepRecord) -> StoreResult<()>;

    async fn update_step(&self, step: &WorkflowStepRecord) -> StoreResult<()>;

    async fn list_steps(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowStepRecord>>;

    // ===== Rules =====

    /// Active rules for an entity kind, lowest priority value first.
    async fn active_rules(&self, kind: EntityKind) -> StoreResult<Vec<Rule>>;

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<Rule>>;

    async fn save_rule(&self, rule: &Rule) -> StoreResult<()>;

    async fn record_rule_execution(&self, rule_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // ===== Entities =====

    async fn get_entity(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<EntityState>>;

    async fn insert_entity(&self, kind: EntityKind, id: Uuid, attributes: &EntityState) -> StoreResult<()>;

    /// Merge `fields` into the entity. Returns false when the entity does not exist.
    async fn update_entity(&self, kind: EntityKind, id: Uuid, fields: &EntityState) -> StoreResult<bool>;

    // ===== Outbound records =====

    async fn enqueue_notification(&self, notification: &NotificationRecord) -> StoreResult<()>;

    async fn pending_notifications(&self, limit: i64) -> StoreResult<Vec<NotificationRecord>>;

    async fn insert_task(&self, task: &TaskRecord) -> StoreResult<()>;

    async fn recent_tasks(&self, limit: i64) -> StoreResult<Vec<TaskRecord>>;

    // ===== Agent executions =====

    async fn insert_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()>;

    async fn update_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()>;

    async fn get_agent_execution(&self, id: Uuid) -> StoreResult<Option<AgentExecution>>;

    /// Mark every execution still running past its own timeout window as
    /// timed out, returning the reclaimed ids.
    async fn reclaim_stuck_agents(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    /// Per (agent type, status) aggregates for executions created since `since`.
    async fn agent_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<AgentExecutionStats>>;
}

pub(crate) const RECLAIMED_ERROR: &str = "Execution exceeded its timeout window and was reclaimed";
