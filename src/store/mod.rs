//! Persistence collaborators
//!
//! Definitions (processes, forms, projects, catalogs) are read-only to the
//! runtime. Instances and submissions are read and written on every call;
//! the runtime keeps no state of its own between calls.

mod memory;

pub use memory::InMemoryStore;

pub use crate::error::{StoreError, StoreResult};

use crate::core::{
    Catalog, FormDefinition, FormSubmission, InstanceStatus, ProcessDefinition, ProcessInstance,
    Project,
};
use crate::types::{CatalogId, FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId, ProjectId};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Read access to authored definitions
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn process(&self, id: &ProcessDefinitionId) -> StoreResult<Option<ProcessDefinition>>;

    /// Processes belonging to a project
    async fn processes_in_project(&self, project_id: &ProjectId)
        -> StoreResult<Vec<ProcessDefinition>>;

    async fn form(&self, id: &FormDefinitionId) -> StoreResult<Option<FormDefinition>>;

    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    async fn catalog(&self, id: &CatalogId) -> StoreResult<Option<Catalog>>;
}

/// Instance and submission persistence
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Create an instance with a fresh id and the next document number
    async fn create_instance(
        &self,
        process_definition_id: ProcessDefinitionId,
        current_node_id: Option<NodeId>,
        status: InstanceStatus,
        context: Map<String, Value>,
    ) -> StoreResult<ProcessInstance>;

    async fn instance(&self, id: &InstanceId) -> StoreResult<Option<ProcessInstance>>;

    /// All instances, by document number
    async fn list_instances(&self) -> StoreResult<Vec<ProcessInstance>>;

    /// Replace a stored instance. Fails with `InstanceNotFound` for unknown ids.
    async fn update_instance(&self, instance: &ProcessInstance) -> StoreResult<()>;

    async fn submission(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> StoreResult<Option<FormSubmission>>;

    /// Insert or replace the submission for its (instance, node) pair
    async fn upsert_submission(&self, submission: FormSubmission) -> StoreResult<()>;

    /// Upsert `submission` and replace `instance` as one unit: either both
    /// are stored or neither is.
    async fn commit_submission(
        &self,
        submission: FormSubmission,
        instance: &ProcessInstance,
    ) -> StoreResult<()>;
}
