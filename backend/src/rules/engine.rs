// Rule Engine - Evaluates active rules against an entity's current state

use std::sync::Arc;

use chrono::Utc;
use fieldflow_shared::EntityKind;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Rule;
use crate::services::DefinitionCache;
use crate::store::{RecordStore, StoreError};
use crate::workflows::{conditions, ExecutionContext, StepError, StepExecutor};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Action '{action}' failed: {source}")]
    Action {
        action: &'static str,
        #[source]
        source: StepError,
    },
}

/// Outcome of one `process_entity` call
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleRunSummary {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub event: String,
    pub evaluated: usize,
    pub matched: usize,
    pub failed: usize,
    /// Rules whose actions all ran
    pub fired: Vec<Uuid>,
}

impl RuleRunSummary {
    fn empty(entity_type: EntityKind, entity_id: Uuid, event: &str) -> Self {
        Self {
            entity_type,
            entity_id,
            event: event.to_string(),
            evaluated: 0,
            matched: 0,
            failed: 0,
            fired: Vec::new(),
        }
    }
}

pub struct RuleEngine {
    store: Arc<dyn RecordStore>,
    executor: Arc<StepExecutor>,
    cache: DefinitionCache<EntityKind, Arc<Vec<Rule>>>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RecordStore>, executor: Arc<StepExecutor>) -> Self {
        Self {
            store,
            executor,
            cache: DefinitionCache::new(),
        }
    }

    /// Run every active rule for `entity_type` that listens for `event`.
    /// One rule failing never stops the rules after it.
    pub async fn process_entity(
        &self,
        entity_type: EntityKind,
        entity_id: Uuid,
        event: &str,
    ) -> Result<RuleRunSummary, RuleError> {
        let mut summary = RuleRunSummary::empty(entity_type, entity_id, event);

        let Some(entity) = self.store.get_entity(entity_type, entity_id).await? else {
            warn!("{} {} not found, no rules evaluated", entity_type, entity_id);
            return Ok(summary);
        };
        let state = Value::Object(entity);

        let rules = self.active_rules(entity_type).await?;

        for rule in rules.iter().filter(|r| r.listens_for(event)) {
            summary.evaluated += 1;

            if !conditions::evaluate(rule.conditions.as_ref(), &state) {
                continue;
            }
            summary.matched += 1;

            match self.fire(rule, entity_type, entity_id, &state).await {
                Ok(()) => {
                    info!("Rule '{}' fired for {} {}", rule.name, entity_type, entity_id);
                    summary.fired.push(rule.id);
                }
                Err(e) => {
                    error!("Rule '{}' failed for {} {}: {}", rule.name, entity_type, entity_id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn fire(
        &self,
        rule: &Rule,
        entity_type: EntityKind,
        entity_id: Uuid,
        state: &Value,
    ) -> Result<(), RuleError> {
        let context = ExecutionContext::for_rule(rule.id, state.clone());

        for action in &rule.actions {
            let step = action.to_step(&rule.name, entity_type, entity_id);
            self.executor
                .execute(&step, &context)
                .await
                .map_err(|source| RuleError::Action {
                    action: action.label(),
                    source,
                })?;
        }

        self.store.record_rule_execution(rule.id, Utc::now()).await?;
        Ok(())
    }

    async fn active_rules(&self, kind: EntityKind) -> Result<Arc<Vec<Rule>>, StoreError> {
        let store = self.store.clone();
        let rules = self
            .cache
            .get_or_load(&kind, || async move {
                Ok::<_, StoreError>(Some(Arc::new(store.active_rules(kind).await?)))
            })
            .await?;

        Ok(rules.unwrap_or_default())
    }

    /// Persist a rule and drop the cached rule lists. A rule may have moved
    /// between entity kinds, so every kind is reloaded.
    pub async fn save_rule(&self, rule: &Rule) -> Result<(), RuleError> {
        self.store.save_rule(rule).await?;
        self.cache.clear().await;
        Ok(())
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<Option<Rule>, RuleError> {
        Ok(self.store.get_rule(rule_id).await?)
    }
}
