//! Request and response shapes of the runtime service

use crate::core::{
    Catalog, Edge, FieldDefinition, FieldType, FormDefinition, InstanceStatus, Permission,
    ProcessInstance, SelectOption,
};
use crate::types::{
    CatalogId, EdgeId, EdgeKey, FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId,
    ProjectId, RoleId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A form field as one caller may see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validations: Option<Map<String, Value>>,
}

/// A form definition tailored to the caller: hidden fields removed,
/// read-only fields flagged, catalog options filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedForm {
    pub id: FormDefinitionId,
    pub name: String,
    pub description: String,
    pub fields: Vec<RenderedField>,
}

impl RenderedForm {
    /// Render `form`, asking `permission` for each field's effective access.
    ///
    /// Fields backed by a catalog missing from `catalogs` keep their inline
    /// options.
    pub fn render(
        form: &FormDefinition,
        catalogs: &HashMap<CatalogId, Catalog>,
        mut permission: impl FnMut(&FieldDefinition) -> Permission,
    ) -> Self {
        let fields = form
            .fields
            .iter()
            .filter_map(|field| {
                let access = permission(field);
                if access == Permission::Hidden {
                    return None;
                }
                let options = field
                    .catalog_id
                    .as_ref()
                    .and_then(|id| catalogs.get(id))
                    .map(|catalog| catalog.items.clone())
                    .or_else(|| field.options.clone());
                Some(RenderedField {
                    name: field.name.clone(),
                    label: field.label.clone(),
                    field_type: field.field_type,
                    required: field.required,
                    read_only: access == Permission::Read,
                    options,
                    validations: field.validations.clone(),
                })
            })
            .collect();

        Self {
            id: form.id,
            name: form.name.clone(),
            description: form.description.clone(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&RenderedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// An outgoing edge the caller may take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionView {
    pub edge_id: EdgeId,
    pub key: EdgeKey,
    pub label: String,
    pub target_node_id: NodeId,
}

impl From<&Edge> for TransitionView {
    fn from(edge: &Edge) -> Self {
        Self {
            edge_id: edge.id.clone(),
            key: edge.key.clone(),
            label: edge.label.clone(),
            target_node_id: edge.target_node_id.clone(),
        }
    }
}

/// What a caller needs to fill in the current step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentForm {
    pub form: RenderedForm,
    pub node_id: NodeId,
    /// Data previously saved or submitted at this node
    pub submission_data: Option<Map<String, Value>>,
    pub available_transitions: Vec<TransitionView>,
    pub instance: ProcessInstance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    /// Checked against the node's bound form when given
    #[serde(default)]
    pub form_definition_id: Option<FormDefinitionId>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    #[serde(default)]
    pub chosen_edge_key: Option<EdgeKey>,
}

impl SubmitRequest {
    pub fn new(instance_id: InstanceId, node_id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            instance_id,
            node_id: NodeId::new(node_id),
            form_definition_id: None,
            data,
            role_ids: Vec::new(),
            chosen_edge_key: None,
        }
    }

    pub fn with_form(mut self, form_definition_id: FormDefinitionId) -> Self {
        self.form_definition_id = Some(form_definition_id);
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_ids = roles.into_iter().map(RoleId::new).collect();
        self
    }

    pub fn choosing(mut self, key: impl Into<String>) -> Self {
        self.chosen_edge_key = Some(EdgeKey::new(key));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub current_node_id: Option<NodeId>,
    pub completed: bool,
}

impl From<&ProcessInstance> for SubmitOutcome {
    fn from(instance: &ProcessInstance) -> Self {
        Self {
            instance_id: instance.id,
            status: instance.status,
            current_node_id: instance.current_node_id.clone(),
            completed: instance.is_completed(),
        }
    }
}

/// One row of the document list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: InstanceId,
    pub document_number: u64,
    pub process_definition_id: ProcessDefinitionId,
    /// Empty when the process definition no longer exists
    pub process_name: String,
    pub project_id: Option<ProjectId>,
    pub status: InstanceStatus,
    pub current_node_id: Option<NodeId>,
}
