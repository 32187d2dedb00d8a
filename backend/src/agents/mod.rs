// Agent Executions - Tracked calls to external long-running agents
//
// Every call gets a persistent record with a fixed timeout window, bounded
// retries with exponential backoff, and a sweep that reclaims executions
// left running past that window.

pub mod client;
pub mod manager;

use crate::store::StoreError;

pub use client::{AgentClient, AgentRequest, HttpAgentClient};
pub use manager::{AgentExecutionManager, AgentOutcome, AgentSettings, StuckAgentReport};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Agent call failed: {0}")]
    CallFailed(String),
    #[error("No agent endpoint configured")]
    NotConfigured,
}
