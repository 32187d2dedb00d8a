// Automation core - wires workflows, rules and agent tracking over one store

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agents::{AgentClient, AgentExecutionManager, AgentSettings, HttpAgentClient};
use crate::config::Config;
use crate::rules::RuleEngine;
use crate::store::RecordStore;
use crate::workflows::{StepError, StepExecutor, StepRegistry, WorkflowRunner, WorkflowWorker};

pub struct AutomationCore {
    pub store: Arc<dyn RecordStore>,
    pub executor: Arc<StepExecutor>,
    pub workflows: Arc<WorkflowRunner>,
    pub rules: Arc<RuleEngine>,
    pub agents: Arc<AgentExecutionManager>,
    worker: Option<WorkflowWorker>,
}

impl AutomationCore {
    /// Build every component with the HTTP agent client from config.
    pub fn new(store: Arc<dyn RecordStore>, config: &Config) -> Result<Self, StepError> {
        let client = Arc::new(HttpAgentClient::new(&config.agents));
        Self::with_agent_client(store, config, client)
    }

    pub fn with_agent_client(
        store: Arc<dyn RecordStore>,
        config: &Config,
        client: Arc<dyn AgentClient>,
    ) -> Result<Self, StepError> {
        let registry = StepRegistry::with_defaults(store.clone(), &config.workflows)?;
        let executor = Arc::new(StepExecutor::new(registry));
        let (runner, worker) = WorkflowRunner::new(store.clone(), executor.clone(), &config.workflows);
        let rules = RuleEngine::new(store.clone(), executor.clone());
        let agents = AgentExecutionManager::new(store.clone(), client, AgentSettings::from(&config.agents));

        Ok(Self {
            store,
            executor,
            workflows: Arc::new(runner),
            rules: Arc::new(rules),
            agents: Arc::new(agents),
            worker: Some(worker),
        })
    }

    /// Start the workflow worker loop. Returns `None` if it is already running.
    pub fn spawn_worker(&mut self) -> Option<JoinHandle<()>> {
        self.worker.take().map(WorkflowWorker::spawn)
    }
}
