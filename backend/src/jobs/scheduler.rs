// Job Scheduler - Cron-driven background jobs for the automation core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::StuckAgentSweepJob;
use crate::agents::AgentExecutionManager;

const MAX_EXECUTION_LOGS: usize = 100;

pub const STUCK_AGENT_SWEEP: &str = "stuck_agent_sweep";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub stuck_agent_sweep_enabled: bool,
    pub stuck_agent_sweep_minutes: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            stuck_agent_sweep_enabled: true,
            stuck_agent_sweep_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

type ExecutionLogs = Arc<RwLock<Vec<JobExecutionLog>>>;

pub struct JobScheduler {
    scheduler: TokioScheduler,
    agents: Arc<AgentExecutionManager>,
    config: JobConfig,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(agents: Arc<AgentExecutionManager>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            agents,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_stuck_agent_sweep().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_stuck_agent_sweep(&self) -> JobResult<()> {
        if !self.config.stuck_agent_sweep_enabled {
            info!("Stuck agent sweep is disabled, skipping");
            return Ok(());
        }

        let interval = self.config.stuck_agent_sweep_minutes;
        if interval == 0 || interval > 59 {
            return Err(JobError::ConfigError(format!(
                "stuck agent sweep interval must be 1-59 minutes, got {}",
                interval
            )));
        }
        let cron_expr = format!("0 */{} * * * *", interval); // Every N minutes

        let agents = self.agents.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let agents = agents.clone();
            let logs = logs.clone();

            Box::pin(async move {
                run_stuck_agent_sweep(agents, &logs).await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled stuck agent sweep to run every {} minutes", interval);

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<JobExecutionLog> {
        match job_name {
            STUCK_AGENT_SWEEP => {
                let log = run_stuck_agent_sweep(self.agents.clone(), &self.execution_logs).await;
                if log.status == JobStatus::Failed {
                    return Err(JobError::ExecutionError(log.errors.join("; ")));
                }
                Ok(log)
            }
            _ => Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }
    }
}

async fn run_stuck_agent_sweep(agents: Arc<AgentExecutionManager>, logs: &ExecutionLogs) -> JobExecutionLog {
    let started_at = Utc::now();
    info!("Running stuck agent sweep");

    let (status, items_processed, errors) = match StuckAgentSweepJob::new(agents).run().await {
        Ok(report) => {
            info!("Stuck agent sweep completed: {} executions reclaimed", report.count);
            (JobStatus::Completed, report.count as i32, Vec::new())
        }
        Err(e) => {
            error!("Stuck agent sweep failed: {}", e);
            (JobStatus::Failed, 0, vec![e.to_string()])
        }
    };

    let completed_at = Utc::now();
    let log = JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: STUCK_AGENT_SWEEP.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    };

    push_log(logs, log.clone()).await;
    log
}

async fn push_log(logs: &ExecutionLogs, log: JobExecutionLog) {
    let mut logs = logs.write().await;
    logs.push(log);
    if logs.len() > MAX_EXECUTION_LOGS {
        let excess = logs.len() - MAX_EXECUTION_LOGS;
        logs.drain(..excess);
    }
}
