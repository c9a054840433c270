//! Document instances and the form data submitted along the way

use crate::types::{FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId, RoleId, SubmissionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Reserved; no current flow creates drafts
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live execution of a process definition for one document.
///
/// `current_node_id` is `None` exactly when the status is terminal.
/// `context` maps node ids to the data submitted there and never shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: InstanceId,
    /// Assigned by the store, monotonic, never reused
    pub document_number: u64,
    pub process_definition_id: ProcessDefinitionId,
    pub current_node_id: Option<NodeId>,
    pub status: InstanceStatus,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessInstance {
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    /// Store `data` as the submission of `node_id`, replacing earlier data
    /// for that node
    pub fn record_data(&mut self, node_id: &NodeId, data: Map<String, Value>) {
        self.context
            .insert(node_id.as_str().to_string(), Value::Object(data));
        self.updated_at = Utc::now();
    }

    pub fn move_to(&mut self, node_id: NodeId) {
        self.current_node_id = Some(node_id);
        self.status = InstanceStatus::Active;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.current_node_id = None;
        self.status = InstanceStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Per-node context plus the caller's `role_ids`, the environment for
    /// transition conditions and field access rules
    pub fn context_with_roles(&self, role_ids: &[RoleId]) -> Map<String, Value> {
        let mut ctx = self.context.clone();
        ctx.insert("role_ids".to_string(), role_list(role_ids));
        ctx
    }

    /// Every submitted field value in one flat map, with `focus` applied
    /// last so its fields win, plus `role_ids`. This is what validator
    /// scripts see.
    pub fn flat_context(&self, focus: Option<&NodeId>, role_ids: &[RoleId]) -> Map<String, Value> {
        let mut flat = Map::new();
        let focus_key = focus.map(NodeId::as_str);
        for (node, data) in &self.context {
            if Some(node.as_str()) == focus_key {
                continue;
            }
            if let Value::Object(fields) = data {
                flat.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        if let Some(Value::Object(fields)) = focus_key.and_then(|k| self.context.get(k)) {
            flat.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        flat.insert("role_ids".to_string(), role_list(role_ids));
        flat
    }
}

fn role_list(role_ids: &[RoleId]) -> Value {
    Value::Array(
        role_ids
            .iter()
            .map(|r| Value::String(r.as_str().to_string()))
            .collect(),
    )
}

/// Data submitted at one node; unique per (instance, node)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub id: SubmissionId,
    pub process_instance_id: InstanceId,
    pub node_id: NodeId,
    pub form_definition_id: FormDefinitionId,
    pub data: Map<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

impl FormSubmission {
    pub fn new(
        process_instance_id: InstanceId,
        node_id: NodeId,
        form_definition_id: FormDefinitionId,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: SubmissionId::generate(),
            process_instance_id,
            node_id,
            form_definition_id,
            data,
            submitted_at: Utc::now(),
        }
    }
}
