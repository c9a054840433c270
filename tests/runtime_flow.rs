//! End-to-end behaviour of the runtime service over the in-memory store

use docflow::config::SandboxConfig;
use docflow::core::{
    Catalog, Edge, FieldAccessRule, FieldDefinition, FieldType, FormDefinition, InstanceStatus,
    Node, Permission, ProcessDefinition, Project, Validator, ValidatorKind,
};
use docflow::rules::Meter;
use docflow::sandbox::{PermissionMap, ScriptEngine, ScriptError, ValidatorSandbox};
use docflow::types::{NodeId, ProcessDefinitionId, RoleId};
use docflow::{
    DefinitionError, InMemoryStore, InstanceStore, RuntimeError, RuntimeService,
    StateMismatchError, SubmitRequest,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn roles(names: &[&str]) -> Vec<RoleId> {
    names.iter().map(|n| RoleId::new(*n)).collect()
}

/// Expense approval: request, then manager review above 1000
struct Expense {
    store: Arc<InMemoryStore>,
    service: RuntimeService,
    process: ProcessDefinition,
    request_form: FormDefinition,
    review_form: FormDefinition,
    project: Project,
}

async fn expense_with(sandbox: Option<ValidatorSandbox>) -> Expense {
    let cities = Catalog::new("Cities")
        .with_item("msk", "Moscow")
        .with_item("kzn", "Kazan");
    let request_form = FormDefinition::new("Expense request")
        .with_field(FieldDefinition::new("amount", FieldType::Number).required())
        .with_field(FieldDefinition::new("purpose", FieldType::Text))
        .with_field(FieldDefinition::new("city", FieldType::Select).with_catalog(cities.id))
        .with_field(FieldDefinition::new("internal_note", FieldType::Textarea))
        .with_field(
            FieldDefinition::new("audit_mark", FieldType::Text)
                .with_rule(FieldAccessRule::for_role("auditor", Permission::Read))
                .with_rule(FieldAccessRule::when("request.amount > 100000", Permission::Hidden)),
        );
    let review_form = FormDefinition::new("Manager review")
        .with_field(FieldDefinition::new("decision_note", FieldType::Textarea));

    let project = Project::new("Finance")
        .with_validator(Validator::new(
            "Request fields",
            ValidatorKind::FieldVisibility,
            "hidden internal_note\nwrite internal_note when 'manager' in role_ids",
        ))
        .with_validator(Validator::new(
            "Managers only",
            ValidatorKind::StepAccess,
            "allow when 'manager' in role_ids",
        ));

    let process = ProcessDefinition::new("Expense")
        .with_project(project.id)
        .with_node(Node::start("start"))
        .with_node(Node::step("request", request_form.id).with_validator("request_fields"))
        .with_node(Node::step("review", review_form.id))
        .with_node(Node::end("done"))
        .with_edge(Edge::new("e0", "start", "request"))
        .with_edge(
            Edge::new("e1", "request", "review")
                .with_key("escalate")
                .with_condition("request.amount > 1000"),
        )
        .with_edge(
            Edge::new("e2", "request", "done")
                .with_key("approve_small")
                .with_condition("request.amount <= 1000"),
        )
        .with_edge(
            Edge::new("e3", "review", "done")
                .with_key("approve")
                .with_validator("managers_only"),
        )
        .with_edge(Edge::new("e4", "review", "request").with_key("return"));

    let store = Arc::new(InMemoryStore::new());
    store.insert_catalog(cities).await;
    store.insert_form(request_form.clone()).await;
    store.insert_form(review_form.clone()).await;
    store.insert_project(project.clone()).await;
    store.insert_process(process.clone()).await;

    let sandbox = sandbox.unwrap_or_else(|| ValidatorSandbox::new(&SandboxConfig::default()));
    let service = RuntimeService::with_sandbox(store.clone(), store.clone(), sandbox);
    Expense {
        store,
        service,
        process,
        request_form,
        review_form,
        project,
    }
}

async fn expense() -> Expense {
    expense_with(None).await
}

#[tokio::test]
async fn test_start_positions_on_first_form() -> anyhow::Result<()> {
    let fx = expense().await;
    let first = fx.service.start(&fx.process.id).await?;
    let second = fx.service.start(&fx.process.id).await?;

    assert_eq!(first.status, InstanceStatus::Active);
    assert_eq!(first.current_node_id, Some(NodeId::new("request")));
    assert!(first.context.is_empty());
    assert!(second.document_number > first.document_number);

    let stored = fx.service.get_instance(&first.id).await?.expect("stored");
    assert_eq!(stored.current_node_id, Some(NodeId::new("request")));
    Ok(())
}

#[tokio::test]
async fn test_start_unknown_process() {
    let fx = expense().await;
    let missing = ProcessDefinitionId::generate();
    let err = fx.service.start(&missing).await.unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Definition(DefinitionError::ProcessNotFound(missing))
    );
}

#[tokio::test]
async fn test_start_without_start_node_creates_nothing() -> anyhow::Result<()> {
    let fx = expense().await;
    let headless = ProcessDefinition::new("Headless").with_node(Node::end("done"));
    fx.store.insert_process(headless.clone()).await;

    let err = fx.service.start(&headless.id).await.unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Definition(DefinitionError::NoStartNode(headless.id))
    );
    assert!(fx.store.list_instances().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_current_form_is_tailored_to_roles() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;

    let employee = fx
        .service
        .get_current_form(&instance.id, &roles(&["employee"]))
        .await?
        .expect("form");
    assert_eq!(employee.node_id, NodeId::new("request"));
    assert_eq!(employee.form.id, fx.request_form.id);
    assert!(employee.form.field("internal_note").is_none());
    assert!(!employee.form.field("audit_mark").unwrap().read_only);
    let city = employee.form.field("city").unwrap().options.clone().unwrap();
    assert_eq!(city.len(), 2);
    assert_eq!(city[0].label, "Moscow");

    let manager = fx
        .service
        .get_current_form(&instance.id, &roles(&["manager"]))
        .await?
        .expect("form");
    assert!(!manager.form.field("internal_note").unwrap().read_only);

    let auditor = fx
        .service
        .get_current_form(&instance.id, &roles(&["auditor"]))
        .await?
        .expect("form");
    assert!(auditor.form.field("audit_mark").unwrap().read_only);
    Ok(())
}

#[tokio::test]
async fn test_current_form_is_idempotent() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    let a = fx.service.get_current_form(&instance.id, &[]).await?.expect("form");
    let b = fx.service.get_current_form(&instance.id, &[]).await?.expect("form");
    assert_eq!(a.form, b.form);
    assert_eq!(a.available_transitions, b.available_transitions);
    assert_eq!(
        fx.service.get_instance(&instance.id).await?.unwrap().current_node_id,
        a.instance.current_node_id
    );
    Ok(())
}

#[tokio::test]
async fn test_saved_draft_drives_transitions() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    let request = NodeId::new("request");

    let before = fx.service.get_current_form(&instance.id, &[]).await?.expect("form");
    assert!(before.available_transitions.is_empty());
    assert!(before.submission_data.is_none());

    fx.service
        .save(&instance.id, &request, data(json!({"amount": 5000})))
        .await?;

    let after = fx.service.get_current_form(&instance.id, &[]).await?.expect("form");
    let keys: Vec<_> = after.available_transitions.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["escalate"]);
    assert_eq!(after.submission_data, Some(data(json!({"amount": 5000}))));

    let stored = fx.service.get_instance(&instance.id).await?.unwrap();
    assert_eq!(stored.current_node_id, Some(request.clone()));
    assert!(stored.context.is_empty());
    assert_eq!(
        fx.service.get_submission_data(&instance.id, &request).await?,
        Some(data(json!({"amount": 5000})))
    );
    Ok(())
}

#[tokio::test]
async fn test_save_rejects_wrong_node() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    let err = fx
        .service
        .save(&instance.id, &NodeId::new("review"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::StateMismatch(StateMismatchError::NodeMismatch { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_small_expense_completes() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;

    let outcome = fx
        .service
        .submit(
            SubmitRequest::new(instance.id, "request", data(json!({"amount": 200})))
                .with_form(fx.request_form.id),
        )
        .await?;
    assert!(outcome.completed);
    assert_eq!(outcome.status, InstanceStatus::Completed);
    assert_eq!(outcome.current_node_id, None);

    let stored = fx.service.get_instance(&instance.id).await?.unwrap();
    assert_eq!(stored.context["request"]["amount"], json!(200));
    assert!(fx.service.get_current_form(&instance.id, &[]).await?.is_none());

    let again = fx
        .service
        .submit(SubmitRequest::new(instance.id, "request", Map::new()))
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        RuntimeError::StateMismatch(StateMismatchError::NotActive { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_large_expense_goes_to_review() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;

    let outcome = fx
        .service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 5000}))))
        .await?;
    assert!(!outcome.completed);
    assert_eq!(outcome.current_node_id, Some(NodeId::new("review")));

    let review = fx
        .service
        .get_current_form(&instance.id, &roles(&["manager"]))
        .await?
        .expect("form");
    assert_eq!(review.form.id, fx.review_form.id);
    let keys: Vec<_> = review.available_transitions.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["approve", "return"]);

    let clerk = fx
        .service
        .get_current_form(&instance.id, &roles(&["clerk"]))
        .await?
        .expect("form");
    let keys: Vec<_> = clerk.available_transitions.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["return"]);
    Ok(())
}

#[tokio::test]
async fn test_no_available_transition_changes_nothing() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    let request = NodeId::new("request");

    // a missing amount fails both conditions
    let err = fx
        .service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"purpose": "taxi"}))))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::StateMismatch(StateMismatchError::NoAvailableTransition(request.clone()))
    );

    let stored = fx.service.get_instance(&instance.id).await?.unwrap();
    assert_eq!(stored, instance);
    assert!(fx.service.get_submission_data(&instance.id, &request).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_single_false_edge_rejects_submit() -> anyhow::Result<()> {
    let fx = expense().await;
    let form = FormDefinition::new("Gate");
    fx.store.insert_form(form.clone()).await;
    let process = ProcessDefinition::new("Gated")
        .with_node(Node::start("s"))
        .with_node(Node::step("ask", form.id))
        .with_node(Node::end("done"))
        .with_edge(Edge::new("a", "s", "ask"))
        .with_edge(Edge::new("b", "ask", "done").with_condition("ask.confirmed == true"));
    fx.store.insert_process(process.clone()).await;

    let instance = fx.service.start(&process.id).await?;
    let ask = NodeId::new("ask");
    let err = fx
        .service
        .submit(SubmitRequest::new(instance.id, "ask", data(json!({"confirmed": false}))))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::StateMismatch(StateMismatchError::NoAvailableTransition(ask.clone()))
    );
    assert_eq!(fx.service.get_instance(&instance.id).await?.unwrap(), instance);
    assert!(fx.service.get_submission_data(&instance.id, &ask).await?.is_none());

    let outcome = fx
        .service
        .submit(SubmitRequest::new(instance.id, "ask", data(json!({"confirmed": true}))))
        .await?;
    assert!(outcome.completed);
    Ok(())
}

#[tokio::test]
async fn test_denied_choice_is_rejected() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    fx.service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 5000}))))
        .await?;
    let at_review = fx.service.get_instance(&instance.id).await?.unwrap();

    let err = fx
        .service
        .submit(
            SubmitRequest::new(instance.id, "review", data(json!({"decision_note": "ok"})))
                .with_roles(["clerk"])
                .choosing("approve"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::StateMismatch(StateMismatchError::TransitionNotAvailable { .. })
    ));
    assert_eq!(fx.service.get_instance(&instance.id).await?.unwrap(), at_review);
    assert!(fx
        .service
        .get_submission_data(&instance.id, &NodeId::new("review"))
        .await?
        .is_none());

    let outcome = fx
        .service
        .submit(
            SubmitRequest::new(instance.id, "review", data(json!({"decision_note": "ok"})))
                .with_roles(["manager"])
                .choosing("approve"),
        )
        .await?;
    assert!(outcome.completed);
    Ok(())
}

#[tokio::test]
async fn test_return_and_resubmit_replaces_data() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    let request = NodeId::new("request");

    fx.service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 5000}))))
        .await?;
    let back = fx
        .service
        .submit(SubmitRequest::new(instance.id, "review", Map::new()).with_roles(["clerk"]))
        .await?;
    assert_eq!(back.current_node_id, Some(request.clone()));

    fx.service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 900}))))
        .await?;

    let stored = fx.service.get_instance(&instance.id).await?.unwrap();
    assert!(stored.is_completed());
    assert_eq!(stored.context["request"], json!({"amount": 900}));
    assert_eq!(
        fx.service.get_submission_data(&instance.id, &request).await?,
        Some(data(json!({"amount": 900})))
    );
    Ok(())
}

#[tokio::test]
async fn test_mismatched_requests_rejected() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;

    let wrong_node = fx
        .service
        .submit(SubmitRequest::new(instance.id, "review", Map::new()))
        .await
        .unwrap_err();
    assert!(matches!(
        wrong_node,
        RuntimeError::StateMismatch(StateMismatchError::NodeMismatch { .. })
    ));

    let wrong_form = fx
        .service
        .submit(
            SubmitRequest::new(instance.id, "request", data(json!({"amount": 1})))
                .with_form(fx.review_form.id),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        wrong_form,
        RuntimeError::StateMismatch(StateMismatchError::FormMismatch { .. })
    ));

    let unknown = docflow::types::InstanceId::generate();
    let missing = fx
        .service
        .submit(SubmitRequest::new(unknown, "request", Map::new()))
        .await
        .unwrap_err();
    assert_eq!(missing, RuntimeError::InstanceNotFound(unknown));
    Ok(())
}

#[tokio::test]
async fn test_gateway_chain_and_dead_end() -> anyhow::Result<()> {
    let fx = expense().await;
    let form = FormDefinition::new("Only");
    fx.store.insert_form(form.clone()).await;
    let process = ProcessDefinition::new("Chain")
        .with_node(Node::start("s"))
        .with_node(Node::gateway("g1"))
        .with_node(Node::step("fill", form.id))
        .with_node(Node::gateway("stuck"))
        .with_edge(Edge::new("a", "s", "g1"))
        .with_edge(Edge::new("b", "g1", "fill"))
        .with_edge(Edge::new("c", "fill", "stuck").with_key("park"));
    fx.store.insert_process(process.clone()).await;

    let instance = fx.service.start(&process.id).await?;
    assert_eq!(instance.current_node_id, Some(NodeId::new("fill")));

    let outcome = fx
        .service
        .submit(SubmitRequest::new(instance.id, "fill", Map::new()))
        .await?;
    assert_eq!(outcome.status, InstanceStatus::Active);
    assert_eq!(outcome.current_node_id, Some(NodeId::new("stuck")));
    assert!(fx.service.get_current_form(&instance.id, &[]).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_step_without_outgoing_edges_completes() -> anyhow::Result<()> {
    let fx = expense().await;
    let form = FormDefinition::new("Last");
    fx.store.insert_form(form.clone()).await;
    let process = ProcessDefinition::new("Single")
        .with_node(Node::start("s"))
        .with_node(Node::step("only", form.id))
        .with_edge(Edge::new("a", "s", "only"));
    fx.store.insert_process(process.clone()).await;

    let instance = fx.service.start(&process.id).await?;
    let outcome = fx
        .service
        .submit(SubmitRequest::new(instance.id, "only", data(json!({"x": 1}))))
        .await?;
    assert!(outcome.completed);
    assert_eq!(outcome.current_node_id, None);
    Ok(())
}

#[tokio::test]
async fn test_chosen_key_without_outgoing_edges_completes() -> anyhow::Result<()> {
    let fx = expense().await;
    let form = FormDefinition::new("Last");
    fx.store.insert_form(form.clone()).await;
    let process = ProcessDefinition::new("Single")
        .with_node(Node::start("s"))
        .with_node(Node::step("only", form.id))
        .with_edge(Edge::new("a", "s", "only"));
    fx.store.insert_process(process.clone()).await;

    let instance = fx.service.start(&process.id).await?;
    let outcome = fx
        .service
        .submit(SubmitRequest::new(instance.id, "only", Map::new()).choosing("finish"))
        .await?;
    assert!(outcome.completed);
    assert_eq!(
        fx.service.get_instance(&instance.id).await?.unwrap().status,
        InstanceStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn test_current_form_with_unknown_form_writes_nothing() -> anyhow::Result<()> {
    let fx = expense().await;
    let unknown = FormDefinition::new("Never stored");
    let process = ProcessDefinition::new("Broken")
        .with_node(Node::start("s"))
        .with_node(Node::step("fill", unknown.id))
        .with_edge(Edge::new("a", "s", "fill"));
    fx.store.insert_process(process.clone()).await;

    let instance = fx
        .store
        .create_instance(process.id, Some(NodeId::new("s")), InstanceStatus::Active, Map::new())
        .await?;
    let err = fx.service.get_current_form(&instance.id, &[]).await.unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Definition(DefinitionError::FormNotFound(unknown.id))
    );
    let stored = fx.service.get_instance(&instance.id).await?.unwrap();
    assert_eq!(stored.current_node_id, Some(NodeId::new("s")));
    Ok(())
}

#[tokio::test]
async fn test_failing_visibility_validator_is_ignored() -> anyhow::Result<()> {
    let fx = expense().await;
    let form = FormDefinition::new("Pay")
        .with_field(FieldDefinition::new("amount", FieldType::Number))
        .with_field(FieldDefinition::new("iban", FieldType::Text));
    let project = Project::new("Broken")
        .with_validator(Validator::new(
            "Type clash",
            ValidatorKind::FieldVisibility,
            "hidden amount when amount > 'lots'",
        ))
        .with_validator(Validator::new("Garbage", ValidatorKind::FieldVisibility, "vanish amount"))
        .with_validator(Validator::new("Bank", ValidatorKind::FieldVisibility, "read iban"));
    let process = ProcessDefinition::new("Pay")
        .with_project(project.id)
        .with_node(Node::start("s"))
        .with_node(
            Node::step("pay", form.id)
                .with_validator("type_clash")
                .with_validator("garbage")
                .with_validator("bank"),
        )
        .with_edge(Edge::new("a", "s", "pay"));
    fx.store.insert_form(form).await;
    fx.store.insert_project(project).await;
    fx.store.insert_process(process.clone()).await;

    let instance = fx.service.start(&process.id).await?;
    fx.service
        .save(&instance.id, &NodeId::new("pay"), data(json!({"amount": 10})))
        .await?;
    let current = fx.service.get_current_form(&instance.id, &[]).await?.expect("form");
    assert!(!current.form.field("amount").unwrap().read_only);
    assert!(current.form.field("iban").unwrap().read_only);
    Ok(())
}

struct Stalling;

impl ScriptEngine for Stalling {
    fn field_visibility(
        &self,
        _code: &str,
        _context: &Map<String, Value>,
        _meter: &mut Meter,
    ) -> Result<PermissionMap, ScriptError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(PermissionMap::new())
    }

    fn step_access(
        &self,
        _code: &str,
        _context: &Map<String, Value>,
        _target: &NodeId,
        _meter: &mut Meter,
    ) -> Result<bool, ScriptError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(true)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_step_access_hides_transition() -> anyhow::Result<()> {
    let config = SandboxConfig {
        timeout_ms: 50,
        ..SandboxConfig::default()
    };
    let fx = expense_with(Some(ValidatorSandbox::with_engine(&config, Arc::new(Stalling)))).await;
    let instance = fx.service.start(&fx.process.id).await?;
    fx.service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 5000}))))
        .await?;

    let review = fx
        .service
        .get_current_form(&instance.id, &roles(&["manager"]))
        .await?
        .expect("form");
    let keys: Vec<_> = review.available_transitions.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["return"]);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_fails_gated_transitions_closed() -> anyhow::Result<()> {
    let fx = expense().await;
    let instance = fx.service.start(&fx.process.id).await?;
    fx.service
        .submit(SubmitRequest::new(instance.id, "request", data(json!({"amount": 5000}))))
        .await?;

    fx.service.shutdown();
    let review = fx
        .service
        .get_current_form(&instance.id, &roles(&["manager"]))
        .await?
        .expect("form");
    let keys: Vec<_> = review.available_transitions.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["return"]);
    Ok(())
}

#[tokio::test]
async fn test_list_documents_by_project() -> anyhow::Result<()> {
    let fx = expense().await;
    let other = ProcessDefinition::new("Loose").with_node(Node::start("s"));
    fx.store.insert_process(other.clone()).await;

    let mine = fx.service.start(&fx.process.id).await?;
    fx.service.start(&other.id).await?;

    let all = fx.service.list_documents(None).await?;
    assert_eq!(all.len(), 2);

    let finance = fx.service.list_documents(Some(&fx.project.id)).await?;
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].id, mine.id);
    assert_eq!(finance[0].process_name, "Expense");
    assert_eq!(finance[0].project_id, Some(fx.project.id));
    assert_eq!(finance[0].current_node_id, Some(NodeId::new("request")));
    Ok(())
}
