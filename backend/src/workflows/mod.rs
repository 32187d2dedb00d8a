// Workflow Automation Engine
//
// Event-driven workflows for the Fieldflow platform: triggers, nested
// conditions, templated step configs and a queue-fed worker.

pub mod actions;
pub mod conditions;
pub mod context;
pub mod engine;
pub mod executor;
pub mod templates;
pub mod triggers;
pub mod worker;

pub use actions::{StepAction, StepDefinition, StepError, StepType};
pub use conditions::{evaluate, Condition, ConditionOperator, FieldCondition};
pub use context::ExecutionContext;
pub use engine::{WorkflowDefinition, WorkflowError, WorkflowRunner};
pub use executor::{StepExecutor, StepRegistry};
pub use triggers::{EventSource, TriggerEvent};
pub use worker::{WorkItem, WorkflowWorker};
