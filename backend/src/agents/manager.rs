// Agent Execution Manager - timeout, retry/backoff and stuck-run reclamation

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fieldflow_shared::{AgentExecution, AgentExecutionStats, AgentStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::client::{AgentClient, AgentRequest};
use super::AgentError;
use crate::config::AgentConfig;
use crate::store::RecordStore;

pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// Window for each attempt; also stored on the record for the stuck sweep
    pub timeout: Duration,
    /// Total attempts when retries are enabled
    pub max_retries: u32,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries.max(1),
        }
    }
}

impl AgentSettings {
    /// Whole seconds stored on the record for the stuck sweep, rounded up
    /// so a sub-second timeout never yields a zero window.
    pub fn window_secs(&self) -> i64 {
        let secs = self.timeout.as_secs() + u64::from(self.timeout.subsec_nanos() > 0);
        secs.max(1) as i64
    }

    /// Backoff after failed attempt `n` (1-based)
    pub fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt))
    }
}

/// Result handed back to the caller of `execute_agent`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutcome {
    pub execution_id: Uuid,
    pub status: AgentStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StuckAgentReport {
    pub count: usize,
    pub execution_ids: Vec<Uuid>,
}

pub struct AgentExecutionManager {
    store: Arc<dyn RecordStore>,
    client: Arc<dyn AgentClient>,
    settings: AgentSettings,
}

impl AgentExecutionManager {
    pub fn new(store: Arc<dyn RecordStore>, client: Arc<dyn AgentClient>, settings: AgentSettings) -> Self {
        Self {
            store,
            client,
            settings,
        }
    }

    pub fn settings(&self) -> AgentSettings {
        self.settings
    }

    /// Run one tracked agent call.
    ///
    /// Each attempt runs under the execution's timeout window. A failed or
    /// timed-out attempt is recorded, then with retries enabled the record
    /// moves to `retrying` and the manager waits `2^attempt` seconds before
    /// the next attempt. Once every attempt has failed the outcome is
    /// `failed` with "Max retries exceeded". Only store faults are returned
    /// as `Err`.
    pub async fn execute_agent(
        &self,
        agent_type: &str,
        task: &str,
        context: Value,
        retry_on_failure: bool,
    ) -> Result<AgentOutcome, AgentError> {
        let timeout = self.settings.timeout;
        let mut execution = AgentExecution::new(agent_type, task, context.clone(), self.settings.window_secs());
        execution.status = AgentStatus::Running;
        execution.started_at = Some(Utc::now());
        self.store.insert_agent_execution(&execution).await?;

        let request = AgentRequest {
            agent: agent_type.to_string(),
            task: task.to_string(),
            context,
        };
        let attempts = if retry_on_failure { self.settings.max_retries } else { 1 };

        info!("Executing agent '{}' as {} (up to {} attempts)", agent_type, execution.id, attempts);

        for attempt in 1..=attempts {
            if attempt > 1 {
                execution.status = AgentStatus::Running;
                execution.started_at = Some(Utc::now());
                execution.completed_at = None;
                execution.error = None;
            }
            execution.attempts = attempt as i32;
            self.store.update_agent_execution(&execution).await?;

            let started = Instant::now();
            let result = tokio::time::timeout(timeout, self.client.call(&request)).await;
            execution.latency_ms = Some(started.elapsed().as_millis() as i64);
            execution.completed_at = Some(Utc::now());

            let failure = match result {
                Ok(Ok(response)) => {
                    execution.status = AgentStatus::Completed;
                    execution.response = Some(response.clone());
                    self.store.update_agent_execution(&execution).await?;

                    info!(
                        "Agent '{}' completed on attempt {} in {}ms",
                        agent_type,
                        attempt,
                        execution.latency_ms.unwrap_or_default()
                    );
                    return Ok(AgentOutcome {
                        execution_id: execution.id,
                        status: AgentStatus::Completed,
                        result: Some(response),
                        error: None,
                    });
                }
                Ok(Err(e)) => {
                    execution.status = AgentStatus::Failed;
                    e.to_string()
                }
                Err(_) => {
                    execution.status = AgentStatus::Timeout;
                    format!("Agent call timed out after {}s", timeout.as_secs())
                }
            };

            execution.error = Some(failure.clone());
            self.store.update_agent_execution(&execution).await?;
            warn!("Agent '{}' attempt {}/{} failed: {}", agent_type, attempt, attempts, failure);

            if !retry_on_failure {
                return Ok(AgentOutcome {
                    execution_id: execution.id,
                    status: execution.status,
                    result: None,
                    error: Some(failure),
                });
            }

            let delay = AgentSettings::backoff(attempt);
            execution.status = AgentStatus::Retrying;
            self.store.update_agent_execution(&execution).await?;
            info!("Retrying agent '{}' in {}s", agent_type, delay.as_secs());
            tokio::time::sleep(delay).await;
        }

        execution.status = AgentStatus::Failed;
        execution.error = Some(MAX_RETRIES_EXCEEDED.to_string());
        execution.completed_at = Some(Utc::now());
        self.store.update_agent_execution(&execution).await?;

        error!("Agent '{}' execution {} gave up after {} attempts", agent_type, execution.id, attempts);

        Ok(AgentOutcome {
            execution_id: execution.id,
            status: AgentStatus::Failed,
            result: None,
            error: Some(MAX_RETRIES_EXCEEDED.to_string()),
        })
    }

    /// Mark executions still running past their own timeout window as timed out.
    pub async fn fix_stuck_agents(&self) -> Result<StuckAgentReport, AgentError> {
        let execution_ids = self.store.reclaim_stuck_agents(Utc::now()).await?;

        if !execution_ids.is_empty() {
            warn!("Reclaimed {} stuck agent executions", execution_ids.len());
        }

        Ok(StuckAgentReport {
            count: execution_ids.len(),
            execution_ids,
        })
    }

    /// Per (agent type, status) figures over the trailing `window`.
    pub async fn get_execution_stats(
        &self,
        window: chrono::Duration,
    ) -> Result<Vec<AgentExecutionStats>, AgentError> {
        Ok(self.store.agent_stats(Utc::now() - window).await?)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<AgentExecution>, AgentError> {
        Ok(self.store.get_agent_execution(execution_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(AgentSettings::backoff(1), Duration::from_secs(2));
        assert_eq!(AgentSettings::backoff(2), Duration::from_secs(4));
        assert_eq!(AgentSettings::backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_settings_never_allow_zero_attempts() {
        let config = AgentConfig {
            max_retries: 0,
            ..AgentConfig::default()
        };
        assert_eq!(AgentSettings::from(&config).max_retries, 1);
    }

    #[test]
    fn test_window_rounds_up_and_is_never_zero() {
        let window = |timeout| AgentSettings { timeout, max_retries: 1 }.window_secs();
        assert_eq!(window(Duration::from_secs(300)), 300);
        assert_eq!(window(Duration::from_millis(1500)), 2);
        assert_eq!(window(Duration::from_millis(200)), 1);
        assert_eq!(window(Duration::ZERO), 1);
    }
}
