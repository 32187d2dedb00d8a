// Workflow Actions - One implementation per step type

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fieldflow_shared::{EntityKind, NotificationChannel, NotificationRecord, TaskRecord, UnknownVariant};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::conditions::{self, Condition};
use super::context::ExecutionContext;
use super::executor::StepExecutor;
use crate::store::{RecordStore, StoreError};

/// Step types understood by the executor. Any other tag deserializes to
/// `Other` and fails at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    Email,
    Sms,
    InApp,
    CreateTask,
    UpdateEntity,
    Webhook,
    Wait,
    Condition,
    Parallel,
    Other(String),
}

impl StepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InApp => "in_app",
            Self::CreateTask => "create_task",
            Self::UpdateEntity => "update_entity",
            Self::Webhook => "webhook",
            Self::Wait => "wait",
            Self::Condition => "condition",
            Self::Parallel => "parallel",
            Self::Other(tag) => tag,
        }
    }

    /// Control-flow steps resolve their sub-steps lazily, one at a time.
    pub fn resolves_config(&self) -> bool {
        !matches!(self, Self::Condition | Self::Parallel)
    }
}

impl From<String> for StepType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "email" => Self::Email,
            "sms" => Self::Sms,
            "in_app" => Self::InApp,
            "create_task" => Self::CreateTask,
            "update_entity" => Self::UpdateEntity,
            "webhook" => Self::Webhook,
            "wait" => Self::Wait,
            "condition" => Self::Condition,
            "parallel" => Self::Parallel,
            _ => Self::Other(tag),
        }
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        step_type.as_str().to_string()
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a workflow. Everything besides `name`, `type` and
/// `continue_on_error` is action-specific config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl StepDefinition {
    pub fn new(name: &str, step_type: StepType, config: Value) -> Self {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            name: name.to_string(),
            step_type,
            continue_on_error: false,
            config,
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("Unknown step type '{0}'")]
    UnknownStepType(String),
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Unknown entity type: {0}")]
    UnknownEntity(#[from] UnknownVariant),
    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: Uuid },
    #[error("Unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Step panicked: {0}")]
    Panicked(String),
}

/// Behaviour behind one step type.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
        executor: &StepExecutor,
    ) -> Result<Value, StepError>;
}

fn non_empty<'a>(config: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required<'a>(config: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, StepError> {
    non_empty(config, key).ok_or(StepError::MissingField(key))
}

fn parse_steps(config: &Map<String, Value>, key: &str) -> Result<Vec<StepDefinition>, StepError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| StepError::InvalidConfig(format!("'{}' is not a step list: {}", key, e))),
    }
}

/// Queue an outbound message on one channel.
pub struct NotifyAction {
    store: Arc<dyn RecordStore>,
    channel: NotificationChannel,
}

impl NotifyAction {
    pub fn new(store: Arc<dyn RecordStore>, channel: NotificationChannel) -> Self {
        Self { store, channel }
    }
}

#[async_trait]
impl StepAction for NotifyAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
        _executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let recipient = non_empty(config, "recipient")
            .or_else(|| non_empty(config, "to"))
            .ok_or(StepError::MissingField("recipient"))?;
        let message = non_empty(config, "message")
            .or_else(|| non_empty(config, "body"))
            .unwrap_or_default();
        let subject = non_empty(config, "subject").map(str::to_string);

        let mut notification = NotificationRecord::pending(self.channel, recipient, subject, message);
        notification.execution_id = context.execution_id;
        notification.rule_id = context.rule_id;

        self.store.enqueue_notification(&notification).await?;
        info!("Queued {} notification to {}", self.channel, recipient);

        Ok(json!({
            "notification_id": notification.id,
            "channel": self.channel.as_str(),
            "recipient": recipient,
            "status": notification.status
        }))
    }
}

pub struct CreateTaskAction {
    store: Arc<dyn RecordStore>,
}

impl CreateTaskAction {
    pub const DEFAULT_DUE_DAYS: i64 = 1;
    pub const DEFAULT_PRIORITY: &'static str = "normal";

    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepAction for CreateTaskAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
        _executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let title = required(config, "title")?;
        let due_days = match config.get("due_days") {
            None | Some(Value::Null) => Self::DEFAULT_DUE_DAYS,
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                StepError::InvalidConfig(format!("due_days must be a whole number, got {}", n))
            })?,
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                StepError::InvalidConfig(format!("due_days must be a whole number, got '{}'", s))
            })?,
            Some(other) => {
                return Err(StepError::InvalidConfig(format!(
                    "due_days must be a whole number, got {}",
                    other
                )));
            }
        };

        let entity_kind = non_empty(config, "entity_type")
            .map(EntityKind::parse_loose)
            .transpose()?;
        let entity_id = non_empty(config, "entity_id").and_then(|id| id.parse().ok());

        let now = Utc::now();
        let due_date = chrono::Duration::try_days(due_days)
            .and_then(|offset| now.checked_add_signed(offset))
            .ok_or_else(|| StepError::InvalidConfig(format!("due_days {} is out of range", due_days)))?;
        let task = TaskRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: non_empty(config, "description").map(str::to_string),
            assigned_to: non_empty(config, "assigned_to").map(str::to_string),
            priority: non_empty(config, "priority")
                .unwrap_or(Self::DEFAULT_PRIORITY)
                .to_string(),
            status: "open".to_string(),
            due_date,
            entity_kind,
            entity_id,
            execution_id: context.execution_id,
            created_at: now,
        };

        self.store.insert_task(&task).await?;
        info!("Created task '{}' due {}", task.title, task.due_date);

        Ok(json!({
            "task_id": task.id,
            "title": task.title,
            "priority": task.priority,
            "due_date": task.due_date
        }))
    }
}

/// Merge template-resolved `updates` into one entity row.
pub struct UpdateEntityAction {
    store: Arc<dyn RecordStore>,
}

impl UpdateEntityAction {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepAction for UpdateEntityAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        _context: &ExecutionContext,
        _executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let kind = EntityKind::parse_loose(required(config, "entity_type")?)?;
        let raw_id = required(config, "entity_id")?;
        let id: Uuid = raw_id
            .parse()
            .map_err(|_| StepError::InvalidConfig(format!("entity_id '{}' is not a UUID", raw_id)))?;

        let updates = match config.get("updates") {
            Some(Value::Object(map)) if !map.is_empty() => map,
            _ => return Err(StepError::MissingField("updates")),
        };

        if !self.store.update_entity(kind, id, updates).await? {
            return Err(StepError::EntityNotFound { kind, id });
        }

        let fields: Vec<&String> = updates.keys().collect();
        info!("Updated {} {} fields {:?}", kind, id, fields);

        Ok(json!({
            "entity_type": kind.as_str(),
            "entity_id": id,
            "updated_fields": fields
        }))
    }
}

pub struct WebhookAction {
    client: reqwest::Client,
}

impl WebhookAction {
    pub fn new(timeout: Duration) -> Result<Self, StepError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StepAction for WebhookAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        _context: &ExecutionContext,
        _executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let url = required(config, "url")?;
        let method = non_empty(config, "method").unwrap_or("POST").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(StepError::UnsupportedMethod(method)),
        };

        if let Some(Value::Object(headers)) = config.get("headers") {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key.as_str(), v);
                }
            }
        }

        if let Some(payload) = config.get("payload").filter(|p| !p.is_null()) {
            if method != "GET" {
                request = request.json(payload);
            }
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        debug!("Webhook {} {} returned {}", method, url, status);

        Ok(json!({
            "status_code": status,
            "body": body
        }))
    }
}

/// Sleep for `seconds` plus optional `minutes`.
pub struct WaitAction;

fn duration_part(config: &Map<String, Value>, key: &str) -> Result<u64, StepError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| StepError::InvalidConfig(format!("{} must be a non-negative integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| StepError::InvalidConfig(format!("{} must be a non-negative integer", key))),
        Some(_) => Err(StepError::InvalidConfig(format!("{} must be a non-negative integer", key))),
    }
}

#[async_trait]
impl StepAction for WaitAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        _context: &ExecutionContext,
        _executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let minutes = duration_part(config, "minutes")?;
        let seconds = duration_part(config, "seconds")?;
        let seconds = minutes
            .checked_mul(60)
            .and_then(|m| m.checked_add(seconds))
            .ok_or_else(|| StepError::InvalidConfig("wait duration is out of range".to_string()))?;

        tokio::time::sleep(Duration::from_secs(seconds)).await;

        Ok(json!({ "waited_seconds": seconds }))
    }
}

/// Evaluate `condition` and run either `then` or `else` in order.
pub struct ConditionAction;

#[async_trait]
impl StepAction for ConditionAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
        executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let condition: Option<Condition> = match config.get("condition") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value(raw.clone())
                    .map_err(|e| StepError::InvalidConfig(format!("bad condition: {}", e)))?,
            ),
        };

        let branch = if conditions::evaluate(condition.as_ref(), context.data()) {
            "then"
        } else {
            "else"
        };

        let mut results = Vec::new();
        for step in parse_steps(config, branch)? {
            results.push(executor.execute(&step, context).await?);
        }

        Ok(json!({ "branch": branch, "results": results }))
    }
}

/// Run `steps` concurrently; a failed branch leaves `{"error": ...}` in its slot.
pub struct ParallelAction;

#[async_trait]
impl StepAction for ParallelAction {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
        executor: &StepExecutor,
    ) -> Result<Value, StepError> {
        let steps = parse_steps(config, "steps")?;
        let outcomes = join_all(steps.iter().map(|step| executor.execute(step, context))).await;

        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|e| json!({ "error": e.to_string() })))
            .collect();

        Ok(json!({ "results": results }))
    }
}
