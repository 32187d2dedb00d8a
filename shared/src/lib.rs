use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

string_enum!(ExecutionStatus, "execution status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

string_enum!(StepStatus, "step status", {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Retrying,
}

string_enum!(AgentStatus, "agent status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Timeout => "timeout",
    Retrying => "retrying",
});

/// Business entities that workflows and rules are allowed to read and write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Lead,
    Customer,
    Job,
    Estimate,
    Invoice,
    ServiceTicket,
}

string_enum!(EntityKind, "entity type", {
    Lead => "lead",
    Customer => "customer",
    Job => "job",
    Estimate => "estimate",
    Invoice => "invoice",
    ServiceTicket => "service_ticket",
});

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Lead,
        EntityKind::Customer,
        EntityKind::Job,
        EntityKind::Estimate,
        EntityKind::Invoice,
        EntityKind::ServiceTicket,
    ];

    /// Storage table backing this entity kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Lead => "leads",
            Self::Customer => "customers",
            Self::Job => "jobs",
            Self::Estimate => "estimates",
            Self::Invoice => "invoices",
            Self::ServiceTicket => "service_tickets",
        }
    }

    /// Lenient parse used for entity types coming from step configs.
    pub fn parse_loose(value: &str) -> Result<Self, UnknownVariant> {
        value.trim().to_lowercase().replace('-', "_").parse()
    }
}

pub type EntityState = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_source: String,
    pub trigger_data: serde_json::Value,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Carried from the triggering event to tie related executions together
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl WorkflowExecution {
    pub fn start(workflow_id: Uuid, trigger_source: &str, trigger_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_source: trigger_source.to_string(),
            trigger_data,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<Uuid>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_number: i32,
    pub name: String,
    pub step_type: String,
    pub status: StepStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStepRecord {
    pub fn start(
        execution_id: Uuid,
        step_number: i32,
        name: &str,
        step_type: &str,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_number,
            name: name.to_string(),
            step_type: step_type.to_string(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(mut self, output: serde_json::Value) -> Self {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.output = None;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

string_enum!(NotificationChannel, "notification channel", {
    Email => "email",
    Sms => "sms",
    InApp => "in_app",
});

/// Outbound message waiting for the delivery service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: Option<String>,
    pub message: String,
    pub status: String,
    pub execution_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn pending(
        channel: NotificationChannel,
        recipient: &str,
        subject: Option<String>,
        message: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            recipient: recipient.to_string(),
            subject,
            message: message.to_string(),
            status: "pending".to_string(),
            execution_id: None,
            rule_id: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub priority: String,
    pub status: String,
    pub due_date: DateTime<Utc>,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: Uuid,
    pub agent_type: String,
    pub task: String,
    pub context: serde_json::Value,
    pub status: AgentStatus,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
    pub attempts: i32,
    /// Fixed when the record is created; reused by every retry and by the stuck sweep.
    pub timeout_secs: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentExecution {
    pub fn new(agent_type: &str, task: &str, context: serde_json::Value, timeout_secs: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.to_string(),
            task: task.to_string(),
            context,
            status: AgentStatus::Pending,
            response: None,
            error: None,
            latency_ms: None,
            attempts: 0,
            timeout_secs,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// True when the execution is still marked running past its own timeout window.
    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        if self.status != AgentStatus::Running {
            return false;
        }
        let since = self.started_at.unwrap_or(self.created_at);
        now - since >= chrono::Duration::seconds(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentExecutionStats {
    pub agent_type: String,
    pub status: AgentStatus,
    pub count: i64,
    pub avg_latency_ms: Option<f64>,
    pub last_execution: Option<DateTime<Utc>>,
}
