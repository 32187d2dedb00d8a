// PostgreSQL record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldflow_shared::{
    AgentExecution, AgentExecutionStats, EntityKind, EntityState, ExecutionStatus, NotificationRecord,
    TaskRecord, WorkflowExecution, WorkflowStepRecord,
};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{RecordStore, StoreResult, RECLAIMED_ERROR};
use crate::rules::Rule;
use crate::workflows::WorkflowDefinition;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    trigger_event: String,
    conditions: Option<Value>,
    steps: Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for WorkflowDefinition {
    type Error = super::StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(WorkflowDefinition {
            id: row.id,
            name: row.name,
            trigger_event: row.trigger_event,
            conditions: row.conditions.map(serde_json::from_value).transpose()?,
            steps: serde_json::from_value(row.steps)?,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    trigger_source: String,
    trigger_data: Value,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    correlation_id: Option<Uuid>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = super::StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(WorkflowExecution {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_source: row.trigger_source,
            trigger_data: row.trigger_data,
            status: row.status.parse()?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error,
            correlation_id: row.correlation_id,
        })
    }
}

#[derive(FromRow)]
struct StepRow {
    id: Uuid,
    execution_id: Uuid,
    step_number: i32,
    name: String,
    step_type: String,
    status: String,
    input: Value,
    output: Option<Value>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepRow> for WorkflowStepRecord {
    type Error = super::StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(WorkflowStepRecord {
            id: row.id,
            execution_id: row.execution_id,
            step_number: row.step_number,
            name: row.name,
            step_type: row.step_type,
            status: row.status.parse()?,
            input: row.input,
            output: row.output,
            error: row.error,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    entity_type: String,
    priority: i32,
    events: Value,
    conditions: Option<Value>,
    actions: Value,
    is_active: bool,
    execution_count: i64,
    last_executed: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for Rule {
    type Error = super::StoreError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        Ok(Rule {
            id: row.id,
            name: row.name,
            entity_type: row.entity_type.parse()?,
            priority: row.priority,
            events: serde_json::from_value(row.events)?,
            conditions: row.conditions.map(serde_json::from_value).transpose()?,
            actions: serde_json::from_value(row.actions)?,
            is_active: row.is_active,
            execution_count: row.execution_count,
            last_executed: row.last_executed,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    channel: String,
    recipient: String,
    subject: Option<String>,
    message: String,
    status: String,
    execution_id: Option<Uuid>,
    rule_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = super::StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(NotificationRecord {
            id: row.id,
            channel: row.channel.parse()?,
            recipient: row.recipient,
            subject: row.subject,
            message: row.message,
            status: row.status,
            execution_id: row.execution_id,
            rule_id: row.rule_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    assigned_to: Option<String>,
    priority: String,
    status: String,
    due_date: DateTime<Utc>,
    entity_type: Option<String>,
    entity_id: Option<Uuid>,
    execution_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = super::StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            id: row.id,
            title: row.title,
            description: row.description,
            assigned_to: row.assigned_to,
            priority: row.priority,
            status: row.status,
            due_date: row.due_date,
            entity_kind: row.entity_type.map(|t| t.parse()).transpose()?,
            entity_id: row.entity_id,
            execution_id: row.execution_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AgentRow {
    id: Uuid,
    agent_type: String,
    task: String,
    context: Value,
    status: String,
    response: Option<Value>,
    error: Option<String>,
    latency_ms: Option<i64>,
    attempts: i32,
    timeout_secs: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AgentRow> for AgentExecution {
    type Error = super::StoreError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(AgentExecution {
            id: row.id,
            agent_type: row.agent_type,
            task: row.task,
            context: row.context,
            status: row.status.parse()?,
            response: row.response,
            error: row.error,
            latency_ms: row.latency_ms,
            attempts: row.attempts,
            timeout_secs: row.timeout_secs,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct StatsRow {
    agent_type: String,
    status: String,
    count: i64,
    avg_latency_ms: Option<f64>,
    last_execution: Option<DateTime<Utc>>,
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = super::StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const WORKFLOW_COLUMNS: &str =
    "id, name, trigger_event, conditions, steps, is_active, created_at, updated_at";
const EXECUTION_COLUMNS: &str =
    "id, workflow_id, trigger_source, trigger_data, status, started_at, completed_at, error, correlation_id";
const STEP_COLUMNS: &str = "id, execution_id, step_number, name, step_type, status, input, output, error, started_at, completed_at";
const RULE_COLUMNS: &str = "id, name, entity_type, priority, events, conditions, actions, is_active, execution_count, last_executed, created_at";
const AGENT_COLUMNS: &str = "id, agent_type, task, context, status, response, error, latency_ms, attempts, timeout_secs, created_at, started_at, completed_at";

#[async_trait]
impl RecordStore for PgStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowDefinition::try_from).transpose()
    }

    async fn workflows_for_event(&self, event: &str) -> StoreResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE trigger_event = $1 AND is_active = true ORDER BY created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(event)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        let conditions = workflow
            .conditions
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, trigger_event, conditions, steps, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                trigger_event = EXCLUDED.trigger_event,
                conditions = EXCLUDED.conditions,
                steps = EXCLUDED.steps,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.trigger_event)
        .bind(conditions)
        .bind(serde_json::to_value(&workflow.steps)?)
        .bind(workflow.is_active)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
            (id, workflow_id, trigger_source, trigger_data, status, started_at, completed_at, error, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(&execution.trigger_source)
        .bind(&execution.trigger_data)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.error)
        .bind(execution.correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, error = $3, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowExecution::try_from).transpose()
    }

    async fn insert_step(&self, step: &WorkflowStepRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps
            (id, execution_id, step_number, name, step_type, status, input, output, error, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(step.id)
        .bind(step.execution_id)
        .bind(step.step_number)
        .bind(&step.name)
        .bind(&step.step_type)
        .bind(step.status.as_str())
        .bind(&step.input)
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.started_at)
        .bind(step.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_step(&self, step: &WorkflowStepRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = $2, output = $3, error = $4, completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(step.id)
        .bind(step.status.as_str())
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowStepRecord>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM workflow_steps WHERE execution_id = $1 ORDER BY step_number ASC",
            STEP_COLUMNS
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn active_rules(&self, kind: EntityKind) -> StoreResult<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM automation_rules WHERE entity_type = $1 AND is_active = true ORDER BY priority ASC, created_at ASC",
            RULE_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<Rule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM automation_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Rule::try_from).transpose()
    }

    async fn save_rule(&self, rule: &Rule) -> StoreResult<()> {
        let conditions = rule.conditions.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO automation_rules
            (id, name, entity_type, priority, events, conditions, actions, is_active, execution_count, last_executed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                entity_type = EXCLUDED.entity_type,
                priority = EXCLUDED.priority,
                events = EXCLUDED.events,
                conditions = EXCLUDED.conditions,
                actions = EXCLUDED.actions,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.entity_type.as_str())
        .bind(rule.priority)
        .bind(serde_json::to_value(&rule.events)?)
        .bind(conditions)
        .bind(serde_json::to_value(&rule.actions)?)
        .bind(rule.is_active)
        .bind(rule.execution_count)
        .bind(rule.last_executed)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_rule_execution(&self, rule_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE automation_rules SET execution_count = execution_count + 1, last_executed = $2 WHERE id = $1",
        )
        .bind(rule_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_entity(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<EntityState>> {
        let row: Option<(Value,)> = sqlx::query_as(&format!(
            "SELECT attributes FROM {} WHERE id = $1",
            kind.table_name()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(attributes,)| {
            let mut state = match attributes {
                Value::Object(map) => map,
                _ => EntityState::new(),
            };
            state.insert("id".to_string(), serde_json::json!(id));
            state
        }))
    }

    async fn insert_entity(&self, kind: EntityKind, id: Uuid, attributes: &EntityState) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, attributes, created_at) VALUES ($1, $2, NOW())",
            kind.table_name()
        ))
        .bind(id)
        .bind(Value::Object(attributes.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_entity(&self, kind: EntityKind, id: Uuid, fields: &EntityState) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET attributes = attributes || $2, updated_at = NOW() WHERE id = $1",
            kind.table_name()
        ))
        .bind(id)
        .bind(Value::Object(fields.clone()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn enqueue_notification(&self, notification: &NotificationRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue
            (id, channel, recipient, subject, message, status, execution_id, rule_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.channel.as_str())
        .bind(&notification.recipient)
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(&notification.status)
        .bind(notification.execution_id)
        .bind(notification.rule_id)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_notifications(&self, limit: i64) -> StoreResult<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, channel, recipient, subject, message, status, execution_id, rule_id, created_at
            FROM notification_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn insert_task(&self, task: &TaskRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, title, description, assigned_to, priority, status, due_date, entity_type, entity_id, execution_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.assigned_to)
        .bind(&task.priority)
        .bind(&task.status)
        .bind(task.due_date)
        .bind(task.entity_kind.map(|k| k.as_str()))
        .bind(task.entity_id)
        .bind(task.execution_id)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_tasks(&self, limit: i64) -> StoreResult<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, description, assigned_to, priority, status, due_date,
                   entity_type, entity_id, execution_id, created_at
            FROM tasks
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn insert_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_executions
            (id, agent_type, task, context, status, response, error, latency_ms, attempts,
             timeout_secs, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.agent_type)
        .bind(&execution.task)
        .bind(&execution.context)
        .bind(execution.status.as_str())
        .bind(&execution.response)
        .bind(&execution.error)
        .bind(execution.latency_ms)
        .bind(execution.attempts)
        .bind(execution.timeout_secs)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE agent_executions
            SET status = $2, response = $3, error = $4, latency_ms = $5, attempts = $6,
                started_at = $7, completed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(&execution.response)
        .bind(&execution.error)
        .bind(execution.latency_ms)
        .bind(execution.attempts)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_agent_execution(&self, id: Uuid) -> StoreResult<Option<AgentExecution>> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {} FROM agent_executions WHERE id = $1",
            AGENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AgentExecution::try_from).transpose()
    }

    async fn reclaim_stuck_agents(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE agent_executions
            SET status = 'timeout', error = $2, completed_at = $1
            WHERE status = 'running'
              AND COALESCE(started_at, created_at) + timeout_secs * INTERVAL '1 second' <= $1
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(RECLAIMED_ERROR)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn agent_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<AgentExecutionStats>> {
        let rows = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                agent_type,
                status,
                COUNT(*) AS count,
                AVG(latency_ms)::float8 AS avg_latency_ms,
                MAX(created_at) AS last_execution
            FROM agent_executions
            WHERE created_at >= $1
            GROUP BY agent_type, status
            ORDER BY agent_type ASC, status ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> StoreResult<AgentExecutionStats> {
                Ok(AgentExecutionStats {
                    agent_type: row.agent_type,
                    status: row.status.parse()?,
                    count: row.count,
                    avg_latency_ms: row.avg_latency_ms,
                    last_execution: row.last_execution,
                })
            })
            .collect()
    }
}
