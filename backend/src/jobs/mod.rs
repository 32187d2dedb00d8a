// Background Jobs Service
//
// Scheduled maintenance for the automation core. Jobs are scheduled using
// tokio-cron-scheduler and run automatically at specified intervals.

pub mod scheduler;
pub mod stuck_agents;

pub use scheduler::{JobConfig, JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus};
pub use stuck_agents::StuckAgentSweepJob;
