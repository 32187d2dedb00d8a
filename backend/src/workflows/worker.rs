// Workflow Worker - Runs queued executions step by step

use std::sync::Arc;

use fieldflow_shared::{ExecutionStatus, WorkflowStepRecord};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::engine::WorkflowDefinition;
use super::executor::StepExecutor;
use crate::store::{RecordStore, StoreError};

/// One accepted trigger waiting to run
#[derive(Debug)]
pub struct WorkItem {
    pub execution_id: Uuid,
    pub workflow: Arc<WorkflowDefinition>,
    pub trigger_data: Value,
}

enum Abort {
    Step(String),
    Store(StoreError),
}

impl From<StoreError> for Abort {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

pub struct WorkflowWorker {
    receiver: mpsc::Receiver<WorkItem>,
    store: Arc<dyn RecordStore>,
    executor: Arc<StepExecutor>,
    permits: Arc<Semaphore>,
}

impl WorkflowWorker {
    pub fn new(
        receiver: mpsc::Receiver<WorkItem>,
        store: Arc<dyn RecordStore>,
        executor: Arc<StepExecutor>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            receiver,
            store,
            executor,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(mut self) {
        info!("Workflow worker started");

        while let Some(item) = self.receiver.recv().await {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let store = self.store.clone();
            let executor = self.executor.clone();

            tokio::spawn(async move {
                let _permit = permit;
                supervise(store, executor, item).await;
            });
        }

        info!("Workflow worker stopped");
    }
}

/// Run one execution on its own task so a panic still leaves a final status.
async fn supervise(store: Arc<dyn RecordStore>, executor: Arc<StepExecutor>, item: WorkItem) {
    let execution_id = item.execution_id;
    let run_store = store.clone();
    let run = tokio::spawn(async move { run_execution(run_store.as_ref(), &executor, item).await });

    if let Err(e) = run.await {
        error!("Execution {} aborted: {}", execution_id, e);
        let reason = if e.is_panic() { "Execution panicked" } else { "Execution cancelled" };
        if let Err(e) = store
            .finish_execution(execution_id, ExecutionStatus::Failed, Some(reason))
            .await
        {
            error!("Failed to record final status of execution {}: {}", execution_id, e);
        }
    }
}

/// Run every step of one execution and record the final status.
pub async fn run_execution(store: &dyn RecordStore, executor: &StepExecutor, item: WorkItem) {
    let execution_id = item.execution_id;
    let workflow = item.workflow;
    let mut context = ExecutionContext::for_execution(execution_id, workflow.id, item.trigger_data);

    let (status, failure) = match run_steps(store, executor, &workflow, &mut context).await {
        Ok(()) => {
            info!("Workflow '{}' execution {} completed", workflow.name, execution_id);
            (ExecutionStatus::Completed, None)
        }
        Err(Abort::Step(message)) => {
            error!("Workflow '{}' execution {} failed: {}", workflow.name, execution_id, message);
            (ExecutionStatus::Failed, Some(message))
        }
        Err(Abort::Store(e)) => {
            error!("Store failure during execution {}: {}", execution_id, e);
            (ExecutionStatus::Failed, Some(format!("Store failure: {}", e)))
        }
    };

    if let Err(e) = store
        .finish_execution(execution_id, status, failure.as_deref())
        .await
    {
        error!("Failed to record final status of execution {}: {}", execution_id, e);
    }
}

async fn run_steps(
    store: &dyn RecordStore,
    executor: &StepExecutor,
    workflow: &WorkflowDefinition,
    context: &mut ExecutionContext,
) -> Result<(), Abort> {
    let execution_id = context.execution_id.unwrap_or_default();

    for (index, step) in workflow.steps.iter().enumerate() {
        let step_number = index as i32 + 1;
        let input = Value::Object(executor.resolve_config(step, context));
        let record =
            WorkflowStepRecord::start(execution_id, step_number, &step.name, step.step_type.as_str(), input);
        store.insert_step(&record).await?;

        match executor.execute(step, context).await {
            Ok(output) => {
                store.update_step(&record.complete(output.clone())).await?;
                context.record_step_output(step_number, output);
            }
            Err(e) => {
                let message = e.to_string();
                store.update_step(&record.fail(message.clone())).await?;

                if !step.continue_on_error {
                    return Err(Abort::Step(format!(
                        "Step {} ({}) failed: {}",
                        step_number, step.name, message
                    )));
                }

                warn!(
                    "Step {} ({}) failed, continuing: {}",
                    step_number, step.name, message
                );
                context.record_step_output(step_number, json!({ "error": message }));
            }
        }
    }

    Ok(())
}
