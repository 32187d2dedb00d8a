// Entity Rules - Priority-ordered automation on entity lifecycle events

pub mod engine;

use chrono::{DateTime, Utc};
use fieldflow_shared::{EntityKind, NotificationChannel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::workflows::{Condition, StepDefinition, StepType};

pub use engine::{RuleEngine, RuleError, RuleRunSummary};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityKind,
    /// Lower values run first
    pub priority: i32,
    /// Events this rule listens for; empty means every event
    #[serde(default)]
    pub events: Vec<String>,
    pub conditions: Option<Condition>,
    pub actions: Vec<RuleAction>,
    pub is_active: bool,
    pub execution_count: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(name: &str, entity_type: EntityKind, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            entity_type,
            priority,
            events: Vec::new(),
            conditions: None,
            actions: Vec::new(),
            is_active: true,
            execution_count: 0,
            last_executed: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_conditions(mut self, conditions: Condition) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn on_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn listens_for(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

/// What a matched rule does. String fields may hold `{{field}}`
/// placeholders resolved against the entity's current state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Assign {
        assigned_to: String,
    },
    Notify {
        #[serde(default = "default_channel")]
        channel: NotificationChannel,
        recipient: String,
        #[serde(default)]
        subject: Option<String>,
        message: String,
    },
    Update {
        updates: Map<String, Value>,
    },
    CreateTask {
        title: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        assigned_to: Option<String>,
        #[serde(default)]
        priority: Option<String>,
        #[serde(default)]
        due_days: Option<i64>,
    },
}

fn default_channel() -> NotificationChannel {
    NotificationChannel::Email
}

impl RuleAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::Notify { .. } => "notify",
            Self::Update { .. } => "update",
            Self::CreateTask { .. } => "create_task",
        }
    }

    /// Express the action as a workflow step bound to one entity.
    pub fn to_step(&self, rule_name: &str, kind: EntityKind, entity_id: Uuid) -> StepDefinition {
        let name = format!("{}: {}", rule_name, self.label());

        match self {
            Self::Assign { assigned_to } => StepDefinition::new(
                &name,
                StepType::UpdateEntity,
                json!({
                    "entity_type": kind.as_str(),
                    "entity_id": entity_id,
                    "updates": {"assigned_to": assigned_to}
                }),
            ),
            Self::Update { updates } => StepDefinition::new(
                &name,
                StepType::UpdateEntity,
                json!({
                    "entity_type": kind.as_str(),
                    "entity_id": entity_id,
                    "updates": updates
                }),
            ),
            Self::Notify {
                channel,
                recipient,
                subject,
                message,
            } => {
                let step_type = match channel {
                    NotificationChannel::Email => StepType::Email,
                    NotificationChannel::Sms => StepType::Sms,
                    NotificationChannel::InApp => StepType::InApp,
                };
                StepDefinition::new(
                    &name,
                    step_type,
                    json!({
                        "recipient": recipient,
                        "subject": subject,
                        "message": message
                    }),
                )
            }
            Self::CreateTask {
                title,
                description,
                assigned_to,
                priority,
                due_days,
            } => StepDefinition::new(
                &name,
                StepType::CreateTask,
                json!({
                    "title": title,
                    "description": description,
                    "assigned_to": assigned_to,
                    "priority": priority,
                    "due_days": due_days,
                    "entity_type": kind.as_str(),
                    "entity_id": entity_id
                }),
            ),
        }
    }
}
