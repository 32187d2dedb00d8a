// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use fieldflow::config::{AgentConfig, DatabaseConfig, WorkflowConfig};
use fieldflow::jobs::JobConfig;
use fieldflow::workflows::WorkflowDefinition;
use fieldflow::{AutomationCore, Config, MemoryStore, RecordStore};
use fieldflow_shared::{EntityKind, EntityState, ExecutionStatus, WorkflowExecution};
use serde_json::Value;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

pub fn test_config() -> Config {
    Config {
        database: DatabaseConfig::default(),
        agents: AgentConfig {
            timeout_secs: 5,
            ..AgentConfig::default()
        },
        workflows: WorkflowConfig {
            webhook_timeout_secs: 5,
            ..WorkflowConfig::default()
        },
        jobs: JobConfig::default(),
    }
}

/// Core over a fresh in-memory store with the worker loop running.
pub fn start_core() -> (AutomationCore, Arc<MemoryStore>) {
    init_test_logging();
    let store = Arc::new(MemoryStore::new());
    let mut core = AutomationCore::new(store.clone(), &test_config()).expect("core builds");
    core.spawn_worker();
    (core, store)
}

pub async fn save_workflow(core: &AutomationCore, workflow: &WorkflowDefinition) {
    core.workflows
        .save_workflow(workflow)
        .await
        .expect("workflow saved");
}

/// Poll until the execution leaves `running`.
pub async fn wait_for_execution(store: &MemoryStore, execution_id: Uuid) -> WorkflowExecution {
    for _ in 0..200 {
        if let Some(execution) = store.get_execution(execution_id).await.expect("store readable") {
            if execution.status != ExecutionStatus::Running {
                return execution;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} did not finish", execution_id);
}

pub async fn seed_entity(store: &MemoryStore, kind: EntityKind, attributes: Value) -> Uuid {
    let id = Uuid::new_v4();
    let attributes: EntityState = match attributes {
        Value::Object(map) => map,
        _ => EntityState::new(),
    };
    store
        .insert_entity(kind, id, &attributes)
        .await
        .expect("entity inserted");
    id
}
