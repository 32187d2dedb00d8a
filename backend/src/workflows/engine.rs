// Workflow Engine - Triggers workflows and hands them to the worker

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldflow_shared::{ExecutionStatus, WorkflowExecution, WorkflowStepRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use super::actions::StepDefinition;
use super::conditions::{self, Condition};
use super::executor::StepExecutor;
use super::triggers::{EventSource, TriggerEvent};
use super::worker::{WorkItem, WorkflowWorker};
use crate::config::WorkflowConfig;
use crate::services::DefinitionCache;
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    /// Event name this workflow listens for
    pub trigger_event: String,
    pub conditions: Option<Condition>,
    pub steps: Vec<StepDefinition>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn new(name: &str, trigger_event: &str, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            trigger_event: trigger_event.to_string(),
            conditions: None,
            steps,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Condition) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Workflow worker is not running")]
    WorkerUnavailable,
}

pub struct WorkflowRunner {
    store: Arc<dyn RecordStore>,
    cache: DefinitionCache<Uuid, Arc<WorkflowDefinition>>,
    queue: mpsc::Sender<WorkItem>,
}

impl WorkflowRunner {
    /// Build a runner and the worker that drains its queue. The worker does
    /// nothing until spawned.
    pub fn new(
        store: Arc<dyn RecordStore>,
        executor: Arc<StepExecutor>,
        config: &WorkflowConfig,
    ) -> (Self, WorkflowWorker) {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = WorkflowWorker::new(receiver, store.clone(), executor, config.max_concurrency);

        let runner = Self {
            store,
            cache: DefinitionCache::new(),
            queue,
        };

        (runner, worker)
    }

    /// Start a workflow by id. Returns the execution id, or `None` when the
    /// workflow is missing, inactive or its conditions do not match.
    pub async fn trigger(&self, workflow_id: Uuid, trigger_data: Value) -> Result<Option<Uuid>, WorkflowError> {
        self.trigger_from(workflow_id, trigger_data, &EventSource::System).await
    }

    pub async fn trigger_from(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
        source: &EventSource,
    ) -> Result<Option<Uuid>, WorkflowError> {
        let store = self.store.clone();
        let workflow = self
            .cache
            .get_or_load(&workflow_id, || async move {
                Ok::<_, StoreError>(store.get_workflow(workflow_id).await?.map(Arc::new))
            })
            .await?;

        match workflow {
            Some(workflow) => self.start(workflow, trigger_data, source, None).await,
            None => {
                info!("Workflow {} not found, skipping", workflow_id);
                Ok(None)
            }
        }
    }

    /// Start every active workflow listening for the event's name.
    pub async fn process_event(&self, event: &TriggerEvent) -> Result<Vec<Uuid>, WorkflowError> {
        let workflows = self.store.workflows_for_event(&event.event_type).await?;
        let mut started = Vec::new();

        info!("Processing event: {} ({} workflows)", event.event_type, workflows.len());

        for workflow in workflows {
            if let Some(execution_id) = self
                .start(Arc::new(workflow), event.payload.clone(), &event.source, event.correlation_id)
                .await?
            {
                started.push(execution_id);
            }
        }

        Ok(started)
    }

    async fn start(
        &self,
        workflow: Arc<WorkflowDefinition>,
        trigger_data: Value,
        source: &EventSource,
        correlation_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, WorkflowError> {
        if !workflow.is_active {
            info!("Workflow '{}' is inactive, skipping", workflow.name);
            return Ok(None);
        }

        if !conditions::evaluate(workflow.conditions.as_ref(), &trigger_data) {
            info!("Workflow '{}' conditions not met, skipping", workflow.name);
            return Ok(None);
        }

        let execution = WorkflowExecution::start(workflow.id, &source.to_string(), trigger_data.clone())
            .with_correlation_id(correlation_id);
        self.store.create_execution(&execution).await?;

        let item = WorkItem {
            execution_id: execution.id,
            workflow: workflow.clone(),
            trigger_data,
        };

        if self.queue.send(item).await.is_err() {
            error!("Workflow worker unavailable, failing execution {}", execution.id);
            self.store
                .finish_execution(
                    execution.id,
                    ExecutionStatus::Failed,
                    Some("Workflow worker unavailable"),
                )
                .await?;
            return Err(WorkflowError::WorkerUnavailable);
        }

        info!("Queued workflow '{}' as execution {}", workflow.name, execution.id);
        Ok(Some(execution.id))
    }

    /// Persist a definition and drop its cached copy.
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), WorkflowError> {
        self.store.save_workflow(workflow).await?;
        self.cache.invalidate(&workflow.id).await;
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecution>, WorkflowError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    pub async fn execution_steps(&self, execution_id: Uuid) -> Result<Vec<WorkflowStepRecord>, WorkflowError> {
        Ok(self.store.list_steps(execution_id).await?)
    }
}
