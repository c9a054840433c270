//! Runtime service: start, render, save and submit against the stores

use super::view::{CurrentForm, DocumentSummary, RenderedForm, SubmitOutcome, SubmitRequest, TransitionView};
use crate::config::SandboxConfig;
use crate::core::{
    Catalog, Edge, FormSubmission, InstanceStatus, Node, Permission, ProcessDefinition,
    ProcessInstance, Project, Resolution, ValidatorKind,
};
use crate::error::{DefinitionError, RuntimeError, RuntimeResult, StateMismatchError};
use crate::rules::{evaluate, resolve_access};
use crate::sandbox::ValidatorSandbox;
use crate::store::{DefinitionStore, InstanceStore};
use crate::types::{CatalogId, InstanceId, NodeId, ProcessDefinitionId, ProjectId, RoleId};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// Drives document instances through their process graphs.
///
/// Holds no per-instance state: every operation reads the instance from the
/// store, decides, and writes back. Validator scripts run on the service's
/// own sandbox pool, released by [`RuntimeService::shutdown`].
#[derive(Clone)]
pub struct RuntimeService {
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    sandbox: ValidatorSandbox,
}

impl RuntimeService {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        config: &SandboxConfig,
    ) -> Self {
        Self::with_sandbox(definitions, instances, ValidatorSandbox::new(config))
    }

    pub fn with_sandbox(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        sandbox: ValidatorSandbox,
    ) -> Self {
        Self {
            definitions,
            instances,
            sandbox,
        }
    }

    // ── Instance lifecycle ──────────────────────────────────────────

    /// Create an active instance positioned at the first form step after
    /// the start node
    #[instrument(skip_all, fields(process = %process_definition_id))]
    pub async fn start(
        &self,
        process_definition_id: &ProcessDefinitionId,
    ) -> RuntimeResult<ProcessInstance> {
        let process = self.load_process(process_definition_id).await?;
        let start = process
            .start_node()
            .ok_or(DefinitionError::NoStartNode(process.id))?;

        let mut instance = self
            .instances
            .create_instance(
                process.id,
                Some(start.id.clone()),
                InstanceStatus::Active,
                Map::new(),
            )
            .await?;

        if let Some(node) = process.resolve_forward(&start.id).form_node() {
            if node.id != start.id {
                instance.move_to(node.id.clone());
                self.instances.update_instance(&instance).await?;
            }
        }

        tracing::info!(
            instance_id = %instance.id,
            document_number = instance.document_number,
            current_node = ?instance.current_node_id,
            "process instance started"
        );
        Ok(instance)
    }

    pub async fn get_instance(&self, id: &InstanceId) -> RuntimeResult<Option<ProcessInstance>> {
        Ok(self.instances.instance(id).await?)
    }

    /// The form the caller should fill in next, or `None` when the
    /// instance has no current form step.
    ///
    /// Moves a stored current node forward to the form step it resolves
    /// to; calling this twice changes nothing further.
    pub async fn get_current_form(
        &self,
        instance_id: &InstanceId,
        role_ids: &[RoleId],
    ) -> RuntimeResult<Option<CurrentForm>> {
        let mut instance = self.load_instance(instance_id).await?;
        let Some(current) = instance.current_node_id.clone() else {
            return Ok(None);
        };
        if !instance.is_active() {
            return Ok(None);
        }

        let process = self.load_process(&instance.process_definition_id).await?;
        let resolution = process.resolve_forward(&current);
        let Some(node) = resolution.form_node() else {
            tracing::debug!(instance_id = %instance.id, node = %current, ?resolution, "no current form");
            return Ok(None);
        };
        let Some(form_id) = node.form_definition_id else {
            return Ok(None);
        };

        let form = self
            .definitions
            .form(&form_id)
            .await?
            .ok_or(DefinitionError::FormNotFound(form_id))?;

        if node.id != current {
            instance.move_to(node.id.clone());
            self.instances.update_instance(&instance).await?;
        }

        let submission_data = self
            .instances
            .submission(&instance.id, &node.id)
            .await?
            .map(|s| s.data);

        // the saved draft counts when deciding access and transitions
        let mut working = instance.clone();
        if let Some(draft) = &submission_data {
            working.record_data(&node.id, draft.clone());
        }
        let conditions = working.context_with_roles(role_ids);
        let flat = working.flat_context(Some(&node.id), role_ids);

        let project = self.load_project(&process).await?;
        let visibility: Vec<_> = project
            .iter()
            .flat_map(|p| p.select_validators(&node.validator_keys, ValidatorKind::FieldVisibility))
            .collect();
        let overrides = self.sandbox.field_permissions(&visibility, &flat).await;

        let catalogs = self.load_catalogs(form.fields.iter().filter_map(|f| f.catalog_id)).await?;
        let rendered = RenderedForm::render(&form, &catalogs, |field| {
            overrides
                .get(&field.name)
                .copied()
                .unwrap_or_else(|| resolve_access(&field.access_rules, &conditions, Permission::Write))
        });

        let available_transitions = self
            .surviving_edges(&process, project.as_ref(), node, &conditions, &flat)
            .await
            .into_iter()
            .map(TransitionView::from)
            .collect();

        Ok(Some(CurrentForm {
            form: rendered,
            node_id: node.id.clone(),
            submission_data,
            available_transitions,
            instance,
        }))
    }

    /// Store draft data for the current step without moving the instance
    #[instrument(skip_all, fields(instance_id = %instance_id, node = %node_id))]
    pub async fn save(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
        data: Map<String, Value>,
    ) -> RuntimeResult<()> {
        let instance = self.load_instance(instance_id).await?;
        let process = self.load_process(&instance.process_definition_id).await?;
        let node = current_form_node(&process, &instance, node_id)?;
        let Some(form_id) = node.form_definition_id else {
            return Err(node_mismatch(node_id, None));
        };

        self.instances
            .upsert_submission(FormSubmission::new(instance.id, node.id.clone(), form_id, data))
            .await?;
        tracing::debug!("draft saved");
        Ok(())
    }

    /// Submit the current step and advance along one surviving edge.
    ///
    /// Every check runs before anything is written; a rejected submit
    /// leaves instance and submissions untouched.
    #[instrument(skip_all, fields(instance_id = %request.instance_id, node = %request.node_id))]
    pub async fn submit(&self, request: SubmitRequest) -> RuntimeResult<SubmitOutcome> {
        let instance = self.load_instance(&request.instance_id).await?;
        let process = self.load_process(&instance.process_definition_id).await?;
        let node = current_form_node(&process, &instance, &request.node_id)?;
        let Some(form_id) = node.form_definition_id else {
            return Err(node_mismatch(&request.node_id, None));
        };
        if let Some(given) = request.form_definition_id {
            if given != form_id {
                return Err(StateMismatchError::FormMismatch {
                    node: node.id.clone(),
                    given,
                }
                .into());
            }
        }

        let mut working = instance.clone();
        working.record_data(&node.id, request.data.clone());
        let conditions = working.context_with_roles(&request.role_ids);
        let flat = working.flat_context(Some(&node.id), &request.role_ids);

        let project = self.load_project(&process).await?;
        let survivors = self
            .surviving_edges(&process, project.as_ref(), node, &conditions, &flat)
            .await;

        // with no outgoing edges the submit completes and a chosen key is moot
        let chosen = match &request.chosen_edge_key {
            Some(key) if process.has_outgoing(&node.id) => {
                let edge = survivors.iter().find(|e| &e.key == key).copied().ok_or_else(|| {
                    StateMismatchError::TransitionNotAvailable {
                        node: node.id.clone(),
                        key: key.clone(),
                    }
                })?;
                Some(edge)
            }
            _ => {
                if survivors.len() > 1 {
                    tracing::debug!(
                        candidates = ?survivors.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(),
                        "several transitions available, taking the first"
                    );
                }
                survivors.first().copied()
            }
        };

        match chosen {
            None if process.has_outgoing(&node.id) => {
                tracing::info!("no transition available, submit rejected");
                return Err(StateMismatchError::NoAvailableTransition(node.id.clone()).into());
            }
            None => working.complete(),
            Some(edge) => advance(&process, &mut working, edge),
        }

        let submission = FormSubmission::new(working.id, node.id.clone(), form_id, request.data);
        self.instances.commit_submission(submission, &working).await?;

        tracing::info!(
            edge_key = chosen.map(|e| e.key.as_str()).unwrap_or(""),
            status = %working.status,
            next_node = ?working.current_node_id,
            "form submitted"
        );
        Ok(SubmitOutcome::from(&working))
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_submission_data(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> RuntimeResult<Option<Map<String, Value>>> {
        Ok(self
            .instances
            .submission(instance_id, node_id)
            .await?
            .map(|s| s.data))
    }

    /// All documents, or those whose process belongs to `project_id`
    pub async fn list_documents(
        &self,
        project_id: Option<&ProjectId>,
    ) -> RuntimeResult<Vec<DocumentSummary>> {
        let mut instances = self.instances.list_instances().await?;
        if let Some(project_id) = project_id {
            let in_project: HashSet<ProcessDefinitionId> = self
                .definitions
                .processes_in_project(project_id)
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect();
            instances.retain(|i| in_project.contains(&i.process_definition_id));
        }

        let mut processes: HashMap<ProcessDefinitionId, Option<ProcessDefinition>> = HashMap::new();
        let mut documents = Vec::with_capacity(instances.len());
        for instance in instances {
            let id = instance.process_definition_id;
            if !processes.contains_key(&id) {
                let process = self.definitions.process(&id).await?;
                processes.insert(id, process);
            }
            let process = processes.get(&id).and_then(Option::as_ref);
            documents.push(DocumentSummary {
                id: instance.id,
                document_number: instance.document_number,
                process_definition_id: id,
                process_name: process.map(|p| p.name.clone()).unwrap_or_default(),
                project_id: process.and_then(|p| p.project_id),
                status: instance.status,
                current_node_id: instance.current_node_id,
            });
        }
        Ok(documents)
    }

    /// Stop the validator pool. Later validator runs fail closed.
    pub fn shutdown(&self) {
        self.sandbox.shutdown();
        tracing::info!("runtime service shut down");
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn load_instance(&self, id: &InstanceId) -> RuntimeResult<ProcessInstance> {
        self.instances
            .instance(id)
            .await?
            .ok_or(RuntimeError::InstanceNotFound(*id))
    }

    async fn load_process(&self, id: &ProcessDefinitionId) -> RuntimeResult<ProcessDefinition> {
        Ok(self
            .definitions
            .process(id)
            .await?
            .ok_or(DefinitionError::ProcessNotFound(*id))?)
    }

    /// The process's project, if it has one the store knows
    async fn load_project(&self, process: &ProcessDefinition) -> RuntimeResult<Option<Project>> {
        match &process.project_id {
            Some(id) => Ok(self.definitions.project(id).await?),
            None => Ok(None),
        }
    }

    async fn load_catalogs(
        &self,
        ids: impl Iterator<Item = CatalogId>,
    ) -> RuntimeResult<HashMap<CatalogId, Catalog>> {
        let mut catalogs = HashMap::new();
        for id in ids {
            if catalogs.contains_key(&id) {
                continue;
            }
            match self.definitions.catalog(&id).await? {
                Some(catalog) => {
                    catalogs.insert(id, catalog);
                }
                None => tracing::warn!(catalog_id = %id, "catalog not found"),
            }
        }
        Ok(catalogs)
    }

    /// Outgoing edges of `node`, in definition order, whose condition holds
    /// and whose step access validators allow the target
    async fn surviving_edges<'a>(
        &self,
        process: &'a ProcessDefinition,
        project: Option<&Project>,
        node: &'a Node,
        conditions: &Map<String, Value>,
        flat: &Map<String, Value>,
    ) -> Vec<&'a Edge> {
        let mut survivors = Vec::new();
        for edge in process.edges_from(&node.id) {
            if let Some(condition) = edge.condition_expression.as_deref() {
                if !evaluate(condition, conditions) {
                    tracing::debug!(edge_key = %edge.key, condition, "transition condition false");
                    continue;
                }
            }
            let gates: Vec<_> = project
                .into_iter()
                .flat_map(|p| {
                    p.select_validators(&edge.transition_validator_keys, ValidatorKind::StepAccess)
                })
                .collect();
            if !gates.is_empty()
                && !self
                    .sandbox
                    .step_allowed(&gates, flat, &edge.target_node_id)
                    .await
            {
                tracing::debug!(edge_key = %edge.key, target = %edge.target_node_id, "transition denied by step access");
                continue;
            }
            survivors.push(edge);
        }
        survivors
    }
}

/// The node `node_id` names, provided the instance is active and that node
/// is the form step its current node resolves to
fn current_form_node<'a>(
    process: &'a ProcessDefinition,
    instance: &ProcessInstance,
    node_id: &NodeId,
) -> RuntimeResult<&'a Node> {
    if !instance.is_active() {
        return Err(StateMismatchError::NotActive {
            id: instance.id,
            status: instance.status,
        }
        .into());
    }
    let resolved = instance
        .current_node_id
        .as_ref()
        .and_then(|current| process.resolve_forward(current).form_node());
    match resolved {
        Some(node) if &node.id == node_id => Ok(node),
        Some(node) => Err(node_mismatch(node_id, Some(node.id.clone()))),
        None => Err(node_mismatch(node_id, instance.current_node_id.clone())),
    }
}

fn node_mismatch(given: &NodeId, current: Option<NodeId>) -> RuntimeError {
    StateMismatchError::NodeMismatch {
        given: given.clone(),
        current,
    }
    .into()
}

/// Move `instance` across `edge`: complete on an end target, otherwise
/// settle on the next form step
fn advance(process: &ProcessDefinition, instance: &mut ProcessInstance, edge: &Edge) {
    let target = &edge.target_node_id;
    match process.get_node(target) {
        None => {
            tracing::warn!(edge_key = %edge.key, target = %target, "transition target missing, completing");
            instance.complete();
        }
        Some(node) if node.is_end() => instance.complete(),
        Some(_) => match process.resolve_forward(target) {
            Resolution::Form(next) => instance.move_to(next.id.clone()),
            Resolution::End(_) => instance.complete(),
            Resolution::Missing(missing) => {
                tracing::warn!(edge_key = %edge.key, node = %missing, "resolved into a missing node, completing");
                instance.complete();
            }
            Resolution::DeadEnd(_) | Resolution::Cycle(_) => instance.move_to(target.clone()),
        },
    }
}
