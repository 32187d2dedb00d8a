// Stuck Agent Sweep - Reclaims agent executions left running past their window

use std::sync::Arc;

use tracing::info;

use crate::agents::{AgentError, AgentExecutionManager, StuckAgentReport};

pub struct StuckAgentSweepJob {
    manager: Arc<AgentExecutionManager>,
}

impl StuckAgentSweepJob {
    pub fn new(manager: Arc<AgentExecutionManager>) -> Self {
        Self { manager }
    }

    pub async fn run(&self) -> Result<StuckAgentReport, AgentError> {
        let report = self.manager.fix_stuck_agents().await?;

        if report.count > 0 {
            info!("Stuck agent sweep reclaimed: {:?}", report.execution_ids);
        }

        Ok(report)
    }
}
