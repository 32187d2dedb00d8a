mod common;

use common::{save_workflow, seed_entity, start_core, wait_for_execution};
use fieldflow::workflows::triggers::events;
use fieldflow::workflows::{Condition, StepDefinition, StepType, TriggerEvent, WorkflowDefinition};
use fieldflow::RecordStore;
use fieldflow_shared::{EntityKind, ExecutionStatus, StepStatus};
use serde_json::json;
use uuid::Uuid;

fn notify_step(name: &str) -> StepDefinition {
    StepDefinition::new(
        name,
        StepType::Email,
        json!({"recipient": "{{email}}", "subject": "Hello {{name}}", "message": "Score {{score}}"}),
    )
}

fn broken_step(name: &str) -> StepDefinition {
    // Unknown entity kinds are rejected before any write
    StepDefinition::new(
        name,
        StepType::UpdateEntity,
        json!({"entity_type": "users", "entity_id": Uuid::new_v4(), "updates": {"role": "admin"}}),
    )
}

#[tokio::test]
async fn test_score_condition_gates_execution() {
    let (core, store) = start_core();
    let workflow = WorkflowDefinition::new("Hot lead follow-up", events::LEAD_CREATED, vec![notify_step("notify")])
        .with_conditions(Condition::greater_than("score", 50.0));
    save_workflow(&core, &workflow).await;

    let hot = core
        .workflows
        .trigger(workflow.id, json!({"score": 80, "email": "ada@example.com", "name": "Ada"}))
        .await
        .unwrap()
        .expect("execution started");
    let cold = core.workflows.trigger(workflow.id, json!({"score": 30})).await.unwrap();

    assert!(cold.is_none());
    let execution = wait_for_execution(&store, hot).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_source, "system");

    let queued = store.pending_notifications(10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].subject.as_deref(), Some("Hello Ada"));
    assert_eq!(queued[0].message, "Score 80");
    assert_eq!(queued[0].execution_id, Some(hot));
}

#[tokio::test]
async fn test_failing_step_aborts_remaining_steps() {
    let (core, store) = start_core();
    let workflow = WorkflowDefinition::new(
        "Three steps",
        events::JOB_COMPLETED,
        vec![notify_step("first"), broken_step("second"), notify_step("third")],
    );
    save_workflow(&core, &workflow).await;

    let execution_id = core
        .workflows
        .trigger(workflow.id, json!({"email": "ops@example.com"}))
        .await
        .unwrap()
        .unwrap();
    let execution = wait_for_execution(&store, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("second"));

    let steps = core.workflows.execution_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step_number, 1);
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert!(steps[0].output.is_some() && steps[0].error.is_none());
    assert_eq!(steps[1].step_number, 2);
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert!(steps[1].output.is_none() && steps[1].error.is_some());

    assert_eq!(store.pending_notifications(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_continue_on_error_records_failure_and_proceeds() {
    let (core, store) = start_core();
    let workflow = WorkflowDefinition::new(
        "Tolerant",
        events::JOB_COMPLETED,
        vec![
            broken_step("optional").continue_on_error(),
            StepDefinition::new(
                "report",
                StepType::CreateTask,
                json!({"title": "Step one said: {{step_1.error}}"}),
            ),
        ],
    );
    save_workflow(&core, &workflow).await;

    let execution_id = core.workflows.trigger(workflow.id, json!({})).await.unwrap().unwrap();
    let execution = wait_for_execution(&store, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let steps = core.workflows.execution_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert_eq!(steps[1].status, StepStatus::Completed);

    let tasks = store.recent_tasks(1).await.unwrap();
    assert!(tasks[0].title.starts_with("Step one said: Unknown entity type"));
}

#[tokio::test]
async fn test_later_steps_see_earlier_outputs() {
    let (core, store) = start_core();
    let job_id = seed_entity(&store, EntityKind::Job, json!({"status": "done"})).await;

    let workflow = WorkflowDefinition::new(
        "Close out",
        events::JOB_COMPLETED,
        vec![
            StepDefinition::new("task", StepType::CreateTask, json!({"title": "Invoice job {{job_id}}"})),
            StepDefinition::new(
                "link",
                StepType::UpdateEntity,
                json!({
                    "entity_type": "job",
                    "entity_id": "{{job_id}}",
                    "updates": {"invoice_task": "{{step_1.task_id}}"}
                }),
            ),
        ],
    );
    save_workflow(&core, &workflow).await;

    let execution_id = core
        .workflows
        .trigger(workflow.id, json!({"job_id": job_id.to_string()}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wait_for_execution(&store, execution_id).await.status, ExecutionStatus::Completed);

    let task = &store.recent_tasks(1).await.unwrap()[0];
    let job = store.get_entity(EntityKind::Job, job_id).await.unwrap().unwrap();
    assert_eq!(job["invoice_task"], json!(task.id.to_string()));

    let steps = core.workflows.execution_steps(execution_id).await.unwrap();
    assert_eq!(steps[1].input["updates"]["invoice_task"], json!(task.id.to_string()));
}

#[tokio::test]
async fn test_process_event_starts_matching_workflows() {
    let (core, store) = start_core();
    let listening = WorkflowDefinition::new("Welcome", events::LEAD_CREATED, vec![notify_step("hello")]);
    let other = WorkflowDefinition::new("Invoice chaser", events::INVOICE_OVERDUE, vec![notify_step("chase")]);
    save_workflow(&core, &listening).await;
    save_workflow(&core, &other).await;

    let event = TriggerEvent::lead_created(Uuid::new_v4(), "Ada", 75, "web");
    let started = core.workflows.process_event(&event).await.unwrap();

    assert_eq!(started.len(), 1);
    let execution = wait_for_execution(&store, started[0]).await;
    assert_eq!(execution.workflow_id, listening.id);
    assert!(execution.correlation_id.is_none());

    let overdue = TriggerEvent::invoice_overdue(Uuid::new_v4(), Uuid::new_v4(), 420.0, 14);
    let started = core.workflows.process_event(&overdue).await.unwrap();
    assert_eq!(started.len(), 1);
    let execution = wait_for_execution(&store, started[0]).await;
    assert_eq!(execution.workflow_id, other.id);
    assert_eq!(execution.trigger_source, "scheduler");
}

#[tokio::test]
async fn test_event_correlation_reaches_execution_record() {
    let (core, store) = start_core();
    let job_id = seed_entity(&store, EntityKind::Job, json!({"status": "in_progress"})).await;
    let workflow = WorkflowDefinition::new(
        "Close job",
        events::JOB_COMPLETED,
        vec![StepDefinition::new(
            "mark done",
            StepType::UpdateEntity,
            json!({
                "entity_type": "job",
                "entity_id": "{{job_id}}",
                "updates": {"status": "completed", "closed_by": "{{technician}}"}
            }),
        )],
    );
    save_workflow(&core, &workflow).await;

    let correlation = Uuid::new_v4();
    let event = TriggerEvent::job_completed(job_id, Uuid::new_v4(), Some("sam")).with_correlation_id(correlation);
    let started = core.workflows.process_event(&event).await.unwrap();

    let execution = wait_for_execution(&store, started[0]).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.correlation_id, Some(correlation));

    let job = store.get_entity(EntityKind::Job, job_id).await.unwrap().unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["closed_by"], "sam");
}

#[tokio::test]
async fn test_unknown_step_type_fails_execution() {
    let (core, store) = start_core();
    let workflow: WorkflowDefinition = serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "name": "Legacy",
        "trigger_event": "lead_created",
        "conditions": null,
        "steps": [{"name": "fax it", "type": "fax"}],
        "is_active": true,
        "created_at": chrono::Utc::now(),
        "updated_at": null
    }))
    .unwrap();
    save_workflow(&core, &workflow).await;

    let execution_id = core.workflows.trigger(workflow.id, json!({})).await.unwrap().unwrap();
    let execution = wait_for_execution(&store, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.unwrap().contains("Unknown step type 'fax'"));
}

#[tokio::test]
async fn test_webhook_event_calls_out_and_feeds_next_step() {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/orders"))
        .and(header("x-fieldflow", "1"))
        .and(body_json(json!({"order": "A-17", "status": "received"})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"ack": "ok-17"})))
        .expect(1)
        .mount(&server)
        .await;

    let (core, store) = start_core();
    let workflow = WorkflowDefinition::new(
        "Relay orders",
        events::WEBHOOK_RECEIVED,
        vec![
            StepDefinition::new(
                "relay",
                StepType::Webhook,
                json!({
                    "url": format!("{}/hooks/orders", server.uri()),
                    "headers": {"x-fieldflow": "1"},
                    "payload": {"order": "{{payload.order_id}}", "status": "received"}
                }),
            ),
            StepDefinition::new("follow up", StepType::CreateTask, json!({"title": "Remote said {{step_1.body.ack}}"})),
        ],
    );
    save_workflow(&core, &workflow).await;

    let correlation = Uuid::new_v4();
    let event = TriggerEvent::webhook_received("orders", json!({"order_id": "A-17"})).with_correlation_id(correlation);
    assert_eq!(event.correlation_id, Some(correlation));

    let started = core.workflows.process_event(&event).await.unwrap();
    assert_eq!(started.len(), 1);

    let execution = wait_for_execution(&store, started[0]).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_source, "webhook");
    assert_eq!(execution.correlation_id, Some(correlation));

    let steps = core.workflows.execution_steps(started[0]).await.unwrap();
    assert_eq!(steps[0].output.as_ref().unwrap()["status_code"], 202);
    assert_eq!(store.recent_tasks(1).await.unwrap()[0].title, "Remote said ok-17");
}

#[tokio::test]
async fn test_out_of_range_due_days_fails_execution() {
    let (core, store) = start_core();
    let workflow = WorkflowDefinition::new(
        "Far future",
        events::JOB_COMPLETED,
        vec![StepDefinition::new(
            "task",
            StepType::CreateTask,
            json!({"title": "x", "due_days": 200_000_000}),
        )],
    );
    save_workflow(&core, &workflow).await;

    let execution_id = core.workflows.trigger(workflow.id, json!({})).await.unwrap().unwrap();
    let execution = wait_for_execution(&store, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.unwrap().contains("due_days"));
    let steps = core.workflows.execution_steps(execution_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Failed);
}
