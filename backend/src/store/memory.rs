// In-memory record store for tests and single-process runs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldflow_shared::{
    AgentExecution, AgentExecutionStats, AgentStatus, EntityKind, EntityState, ExecutionStatus,
    NotificationRecord, TaskRecord, WorkflowExecution, WorkflowStepRecord,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult, RECLAIMED_ERROR};
use crate::rules::Rule;
use crate::workflows::WorkflowDefinition;

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowDefinition>,
    executions: HashMap<Uuid, WorkflowExecution>,
    steps: Vec<WorkflowStepRecord>,
    rules: HashMap<Uuid, Rule>,
    entities: HashMap<(EntityKind, Uuid), EntityState>,
    notifications: Vec<NotificationRecord>,
    tasks: Vec<TaskRecord>,
    agent_executions: HashMap<Uuid, AgentExecution>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn workflows_for_event(&self, event: &str) -> StoreResult<Vec<WorkflowDefinition>> {
        let tables = self.tables.read().await;
        let mut workflows: Vec<WorkflowDefinition> = tables
            .workflows
            .values()
            .filter(|w| w.is_active && w.trigger_event == event)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let execution = tables
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Workflow execution {}", id)))?;

        if execution.status != ExecutionStatus::Running {
            return Ok(false);
        }

        execution.status = status;
        execution.error = error.map(str::to_string);
        execution.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn get_execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self.tables.read().await.executions.get(&id).cloned())
    }

    async fn insert_step(&self, step: &WorkflowStepRecord) -> StoreResult<()> {
        self.tables.write().await.steps.push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &WorkflowStepRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .steps
            .iter_mut()
            .find(|s| s.id == step.id)
            .ok_or_else(|| StoreError::NotFound(format!("Workflow step {}", step.id)))?;
        *existing = step.clone();
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowStepRecord>> {
        let tables = self.tables.read().await;
        let mut steps: Vec<WorkflowStepRecord> = tables
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn active_rules(&self, kind: EntityKind) -> StoreResult<Vec<Rule>> {
        let tables = self.tables.read().await;
        let mut rules: Vec<Rule> = tables
            .rules
            .values()
            .filter(|r| r.is_active && r.entity_type == kind)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(rules)
    }

    async fn get_rule(&self, id: Uuid) -> StoreResult<Option<Rule>> {
        Ok(self.tables.read().await.rules.get(&id).cloned())
    }

    async fn save_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.tables.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn record_rule_execution(&self, rule_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let rule = tables
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| StoreError::NotFound(format!("Rule {}", rule_id)))?;
        rule.execution_count += 1;
        rule.last_executed = Some(at);
        Ok(())
    }

    async fn get_entity(&self, kind: EntityKind, id: Uuid) -> StoreResult<Option<EntityState>> {
        let tables = self.tables.read().await;
        Ok(tables.entities.get(&(kind, id)).map(|attributes| {
            let mut state = attributes.clone();
            state.insert("id".to_string(), serde_json::json!(id));
            state
        }))
    }

    async fn insert_entity(&self, kind: EntityKind, id: Uuid, attributes: &EntityState) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .entities
            .insert((kind, id), attributes.clone());
        Ok(())
    }

    async fn update_entity(&self, kind: EntityKind, id: Uuid, fields: &EntityState) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.entities.get_mut(&(kind, id)) {
            Some(attributes) => {
                for (key, value) in fields {
                    attributes.insert(key.clone(), value.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn enqueue_notification(&self, notification: &NotificationRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn pending_notifications(&self, limit: i64) -> StoreResult<Vec<NotificationRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.status == "pending")
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_task(&self, task: &TaskRecord) -> StoreResult<()> {
        self.tables.write().await.tasks.push(task.clone());
        Ok(())
    }

    async fn recent_tasks(&self, limit: i64) -> StoreResult<Vec<TaskRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .agent_executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_agent_execution(&self, execution: &AgentExecution) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.agent_executions.get_mut(&execution.id) {
            Some(existing) => {
                *existing = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("Agent execution {}", execution.id))),
        }
    }

    async fn get_agent_execution(&self, id: Uuid) -> StoreResult<Option<AgentExecution>> {
        Ok(self.tables.read().await.agent_executions.get(&id).cloned())
    }

    async fn reclaim_stuck_agents(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut tables = self.tables.write().await;
        let mut reclaimed = Vec::new();

        for execution in tables.agent_executions.values_mut() {
            if execution.is_stuck(now) {
                execution.status = AgentStatus::Timeout;
                execution.error = Some(RECLAIMED_ERROR.to_string());
                execution.completed_at = Some(now);
                reclaimed.push(execution.id);
            }
        }

        Ok(reclaimed)
    }

    async fn agent_stats(&self, since: DateTime<Utc>) -> StoreResult<Vec<AgentExecutionStats>> {
        struct Accumulator {
            count: i64,
            latency_total: i64,
            latency_samples: i64,
            last_execution: Option<DateTime<Utc>>,
        }

        let tables = self.tables.read().await;
        let mut groups: HashMap<(String, AgentStatus), Accumulator> = HashMap::new();

        for execution in tables.agent_executions.values().filter(|e| e.created_at >= since) {
            let entry = groups
                .entry((execution.agent_type.clone(), execution.status))
                .or_insert(Accumulator {
                    count: 0,
                    latency_total: 0,
                    latency_samples: 0,
                    last_execution: None,
                });
            entry.count += 1;
            if let Some(latency) = execution.latency_ms {
                entry.latency_total += latency;
                entry.latency_samples += 1;
            }
            entry.last_execution = entry.last_execution.max(Some(execution.created_at));
        }

        let mut stats: Vec<AgentExecutionStats> = groups
            .into_iter()
            .map(|((agent_type, status), acc)| AgentExecutionStats {
                agent_type,
                status,
                count: acc.count,
                avg_latency_ms: (acc.latency_samples > 0)
                    .then(|| acc.latency_total as f64 / acc.latency_samples as f64),
                last_execution: acc.last_execution,
            })
            .collect();
        stats.sort_by(|a, b| {
            a.agent_type
                .cmp(&b.agent_type)
                .then_with(|| a.status.as_str().cmp(b.status.as_str()))
        });

        Ok(stats)
    }
}
