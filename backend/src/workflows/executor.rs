// Workflow Executor - Dispatches steps to their registered action

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use fieldflow_shared::NotificationChannel;
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::actions::{
    ConditionAction, CreateTaskAction, NotifyAction, ParallelAction, StepAction, StepDefinition,
    StepError, StepType, UpdateEntityAction, WaitAction, WebhookAction,
};
use super::context::ExecutionContext;
use super::templates;
use crate::config::WorkflowConfig;
use crate::store::RecordStore;

/// Map from step type to its implementation
#[derive(Default)]
pub struct StepRegistry {
    actions: HashMap<StepType, Arc<dyn StepAction>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in step type.
    pub fn with_defaults(store: Arc<dyn RecordStore>, config: &WorkflowConfig) -> Result<Self, StepError> {
        let mut registry = Self::new();

        registry.register(
            StepType::Email,
            NotifyAction::new(store.clone(), NotificationChannel::Email),
        );
        registry.register(
            StepType::Sms,
            NotifyAction::new(store.clone(), NotificationChannel::Sms),
        );
        registry.register(
            StepType::InApp,
            NotifyAction::new(store.clone(), NotificationChannel::InApp),
        );
        registry.register(StepType::CreateTask, CreateTaskAction::new(store.clone()));
        registry.register(StepType::UpdateEntity, UpdateEntityAction::new(store));
        registry.register(StepType::Webhook, WebhookAction::new(config.webhook_timeout())?);
        registry.register(StepType::Wait, WaitAction);
        registry.register(StepType::Condition, ConditionAction);
        registry.register(StepType::Parallel, ParallelAction);

        Ok(registry)
    }

    /// Add or replace the implementation for a step type
    pub fn register(&mut self, step_type: StepType, action: impl StepAction + 'static) {
        self.actions.insert(step_type, Arc::new(action));
    }

    pub fn get(&self, step_type: &StepType) -> Option<Arc<dyn StepAction>> {
        self.actions.get(step_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

pub struct StepExecutor {
    registry: StepRegistry,
}

impl StepExecutor {
    pub fn new(registry: StepRegistry) -> Self {
        Self { registry }
    }

    /// Step config with placeholders resolved against the context.
    pub fn resolve_config(&self, step: &StepDefinition, context: &ExecutionContext) -> Map<String, Value> {
        if !step.step_type.resolves_config() {
            return step.config.clone();
        }

        step.config
            .iter()
            .map(|(key, value)| (key.clone(), templates::resolve(value, context.data())))
            .collect()
    }

    /// Execute a single step. A panicking action is reported as
    /// `StepError::Panicked` instead of unwinding into the caller.
    pub async fn execute(&self, step: &StepDefinition, context: &ExecutionContext) -> Result<Value, StepError> {
        let action = self
            .registry
            .get(&step.step_type)
            .ok_or_else(|| StepError::UnknownStepType(step.step_type.to_string()))?;

        debug!("Executing step '{}' ({})", step.name, step.step_type);

        let config = self.resolve_config(step, context);
        let outcome = AssertUnwindSafe(action.execute(&config, context, self))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic.as_ref()))));

        outcome.inspect_err(|e| {
            error!("Step '{}' ({}) failed: {}", step.name, step.step_type, e);
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use fieldflow_shared::{EntityKind, EntityState};
    use serde_json::json;
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl StepAction for Echo {
        async fn execute(
            &self,
            config: &Map<String, Value>,
            _context: &ExecutionContext,
            _executor: &StepExecutor,
        ) -> Result<Value, StepError> {
            Ok(Value::Object(config.clone()))
        }
    }

    struct Boom;

    #[async_trait]
    impl StepAction for Boom {
        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _context: &ExecutionContext,
            _executor: &StepExecutor,
        ) -> Result<Value, StepError> {
            Err(StepError::InvalidConfig("boom".to_string()))
        }
    }

    struct Panics;

    #[async_trait]
    impl StepAction for Panics {
        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _context: &ExecutionContext,
            _executor: &StepExecutor,
        ) -> Result<Value, StepError> {
            panic!("index out of bounds")
        }
    }

    fn step(raw: Value) -> StepDefinition {
        serde_json::from_value(raw).unwrap()
    }

    fn default_executor(store: Arc<MemoryStore>) -> StepExecutor {
        StepExecutor::new(StepRegistry::with_defaults(store, &WorkflowConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_step_type_errors() {
        let executor = StepExecutor::new(StepRegistry::new());
        let result = executor
            .execute(&step(json!({"name": "x", "type": "telegram"})), &ExecutionContext::default())
            .await;
        assert!(matches!(result, Err(StepError::UnknownStepType(t)) if t == "telegram"));
    }

    #[tokio::test]
    async fn test_config_is_resolved_before_dispatch() {
        let mut registry = StepRegistry::new();
        registry.register(StepType::Other("echo".to_string()), Echo);
        let executor = StepExecutor::new(registry);

        let context = ExecutionContext::new(json!({"name": "Ada"}));
        let output = executor
            .execute(&step(json!({"name": "e", "type": "echo", "greeting": "Hi {{name}}"})), &context)
            .await
            .unwrap();
        assert_eq!(output, json!({"greeting": "Hi Ada"}));
    }

    #[tokio::test]
    async fn test_email_step_queues_notification() {
        let store = Arc::new(MemoryStore::new());
        let executor = default_executor(store.clone());
        let context = ExecutionContext::new(json!({"email": "ada@example.com", "name": "Ada"}));

        let output = executor
            .execute(
                &step(json!({
                    "name": "welcome",
                    "type": "email",
                    "recipient": "{{email}}",
                    "subject": "Welcome {{name}}",
                    "message": "Thanks for reaching out"
                })),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(output["status"], "pending");
        let queued = store.pending_notifications(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].recipient, "ada@example.com");
        assert_eq!(queued[0].subject.as_deref(), Some("Welcome Ada"));
    }

    #[tokio::test]
    async fn test_sms_without_recipient_fails() {
        let executor = default_executor(Arc::new(MemoryStore::new()));
        let result = executor
            .execute(
                &step(json!({"name": "text", "type": "sms", "recipient": "{{phone}}", "message": "hi"})),
                &ExecutionContext::default(),
            )
            .await;
        assert!(matches!(result, Err(StepError::MissingField("recipient"))));
    }

    #[tokio::test]
    async fn test_create_task_defaults() {
        let store = Arc::new(MemoryStore::new());
        let executor = default_executor(store.clone());

        executor
            .execute(
                &step(json!({"name": "follow up", "type": "create_task", "title": "Call {{name}}"})),
                &ExecutionContext::new(json!({"name": "Ada"})),
            )
            .await
            .unwrap();

        let tasks = store.recent_tasks(5).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Call Ada");
        assert_eq!(tasks[0].priority, "normal");
        let due_in = tasks[0].due_date - tasks[0].created_at;
        assert_eq!(due_in.num_days(), 1);
    }

    #[tokio::test]
    async fn test_update_entity_rules() {
        let store = Arc::new(MemoryStore::new());
        let executor = default_executor(store.clone());
        let lead_id = Uuid::new_v4();
        let mut lead = EntityState::new();
        lead.insert("status".to_string(), json!("new"));
        store.insert_entity(EntityKind::Lead, lead_id, &lead).await.unwrap();

        let context = ExecutionContext::new(json!({"lead_id": lead_id.to_string(), "rep": "sam"}));
        executor
            .execute(
                &step(json!({
                    "name": "qualify",
                    "type": "update_entity",
                    "entity_type": "lead",
                    "entity_id": "{{lead_id}}",
                    "updates": {"status": "qualified", "owner": "{{rep}}"}
                })),
                &context,
            )
            .await
            .unwrap();

        let stored = store.get_entity(EntityKind::Lead, lead_id).await.unwrap().unwrap();
        assert_eq!(stored["status"], "qualified");
        assert_eq!(stored["owner"], "sam");

        let unknown = executor
            .execute(
                &step(json!({
                    "name": "bad",
                    "type": "update_entity",
                    "entity_type": "users",
                    "entity_id": "{{lead_id}}",
                    "updates": {"role": "admin"}
                })),
                &context,
            )
            .await;
        assert!(matches!(unknown, Err(StepError::UnknownEntity(_))));

        let missing = executor
            .execute(
                &step(json!({
                    "name": "gone",
                    "type": "update_entity",
                    "entity_type": "job",
                    "entity_id": Uuid::new_v4().to_string(),
                    "updates": {"status": "done"}
                })),
                &context,
            )
            .await;
        assert!(matches!(missing, Err(StepError::EntityNotFound { .. })));
    }

    #[tokio::test]
    async fn test_condition_step_picks_branch() {
        let mut registry = StepRegistry::new();
        registry.register(StepType::Condition, ConditionAction);
        registry.register(StepType::Other("echo".to_string()), Echo);
        let executor = StepExecutor::new(registry);

        let branching = step(json!({
            "name": "vip?",
            "type": "condition",
            "condition": {"field": "tier", "operator": "equals", "value": "vip"},
            "then": [{"name": "a", "type": "echo", "msg": "vip {{name}}"}],
            "else": [{"name": "b", "type": "echo", "msg": "regular"}]
        }));

        let vip = executor
            .execute(&branching, &ExecutionContext::new(json!({"tier": "vip", "name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(vip, json!({"branch": "then", "results": [{"msg": "vip Ada"}]}));

        let regular = executor
            .execute(&branching, &ExecutionContext::new(json!({"tier": "basic"})))
            .await
            .unwrap();
        assert_eq!(regular["branch"], "else");
    }

    #[tokio::test]
    async fn test_condition_sub_step_failure_propagates() {
        let mut registry = StepRegistry::new();
        registry.register(StepType::Condition, ConditionAction);
        registry.register(StepType::Other("boom".to_string()), Boom);
        let executor = StepExecutor::new(registry);

        let result = executor
            .execute(
                &step(json!({"name": "c", "type": "condition", "then": [{"name": "x", "type": "boom"}]})),
                &ExecutionContext::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_parallel_keeps_positions_and_isolates_failures() {
        let mut registry = StepRegistry::new();
        registry.register(StepType::Parallel, ParallelAction);
        registry.register(StepType::Other("echo".to_string()), Echo);
        registry.register(StepType::Other("boom".to_string()), Boom);
        let executor = StepExecutor::new(registry);

        let output = executor
            .execute(
                &step(json!({
                    "name": "fan out",
                    "type": "parallel",
                    "steps": [
                        {"name": "one", "type": "echo", "n": 1},
                        {"name": "two", "type": "boom"},
                        {"name": "three", "type": "echo", "n": 3}
                    ]
                })),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();

        let results = output["results"].as_array().unwrap();
        assert_eq!(results[0], json!({"n": 1}));
        assert!(results[1]["error"].as_str().unwrap().contains("boom"));
        assert_eq!(results[2], json!({"n": 3}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_suspends_for_configured_time() {
        let executor = default_executor(Arc::new(MemoryStore::new()));
        let start = tokio::time::Instant::now();

        let output = executor
            .execute(
                &step(json!({"name": "pause", "type": "wait", "seconds": 5, "minutes": 1})),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(output["waited_seconds"], 65);
        assert!(start.elapsed() >= std::time::Duration::from_secs(65));
    }

    #[tokio::test]
    async fn test_panicking_action_becomes_step_error() {
        let mut registry = StepRegistry::new();
        registry.register(StepType::Other("flaky".to_string()), Panics);
        let executor = StepExecutor::new(registry);

        let result = executor
            .execute(&step(json!({"name": "f", "type": "flaky"})), &ExecutionContext::default())
            .await;
        assert!(matches!(result, Err(StepError::Panicked(msg)) if msg == "index out of bounds"));
    }

    #[tokio::test]
    async fn test_create_task_rejects_out_of_range_due_days() {
        let store = Arc::new(MemoryStore::new());
        let executor = default_executor(store.clone());

        let result = executor
            .execute(
                &step(json!({"name": "far", "type": "create_task", "title": "x", "due_days": 200_000_000})),
                &ExecutionContext::default(),
            )
            .await;
        assert!(matches!(result, Err(StepError::InvalidConfig(_))));
        assert!(store.recent_tasks(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_rejects_out_of_range_duration() {
        let executor = default_executor(Arc::new(MemoryStore::new()));

        let result = executor
            .execute(
                &step(json!({"name": "forever", "type": "wait", "minutes": u64::MAX, "seconds": 1})),
                &ExecutionContext::default(),
            )
            .await;
        assert!(matches!(result, Err(StepError::InvalidConfig(_))));
    }
}
