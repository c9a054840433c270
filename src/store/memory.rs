//! In-memory store for development and testing

use super::{DefinitionStore, InstanceStore, StoreError, StoreResult};
use crate::core::{
    Catalog, FormDefinition, FormSubmission, InstanceStatus, ProcessDefinition, ProcessInstance,
    Project,
};
use crate::types::{CatalogId, FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId, ProjectId};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Instances and submissions share one lock so a commit is a single write
#[derive(Debug, Default)]
struct InstanceTables {
    instances: HashMap<InstanceId, ProcessInstance>,
    submissions: HashMap<(InstanceId, NodeId), FormSubmission>,
}

#[derive(Debug)]
pub struct InMemoryStore {
    processes: Arc<RwLock<HashMap<ProcessDefinitionId, ProcessDefinition>>>,
    forms: Arc<RwLock<HashMap<FormDefinitionId, FormDefinition>>>,
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
    catalogs: Arc<RwLock<HashMap<CatalogId, Catalog>>>,
    tables: Arc<RwLock<InstanceTables>>,
    document_sequence: Arc<AtomicU64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            forms: Arc::new(RwLock::new(HashMap::new())),
            projects: Arc::new(RwLock::new(HashMap::new())),
            catalogs: Arc::new(RwLock::new(HashMap::new())),
            tables: Arc::new(RwLock::new(InstanceTables::default())),
            document_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn insert_process(&self, process: ProcessDefinition) {
        self.processes.write().await.insert(process.id, process);
    }

    pub async fn insert_form(&self, form: FormDefinition) {
        self.forms.write().await.insert(form.id, form);
    }

    pub async fn insert_project(&self, project: Project) {
        self.projects.write().await.insert(project.id, project);
    }

    pub async fn insert_catalog(&self, catalog: Catalog) {
        self.catalogs.write().await.insert(catalog.id, catalog);
    }
}

#[async_trait]
impl DefinitionStore for InMemoryStore {
    async fn process(&self, id: &ProcessDefinitionId) -> StoreResult<Option<ProcessDefinition>> {
        Ok(self.processes.read().await.get(id).cloned())
    }

    async fn processes_in_project(
        &self,
        project_id: &ProjectId,
    ) -> StoreResult<Vec<ProcessDefinition>> {
        let processes = self.processes.read().await;
        Ok(processes
            .values()
            .filter(|p| p.project_id.as_ref() == Some(project_id))
            .cloned()
            .collect())
    }

    async fn form(&self, id: &FormDefinitionId) -> StoreResult<Option<FormDefinition>> {
        Ok(self.forms.read().await.get(id).cloned())
    }

    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn catalog(&self, id: &CatalogId) -> StoreResult<Option<Catalog>> {
        Ok(self.catalogs.read().await.get(id).cloned())
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn create_instance(
        &self,
        process_definition_id: ProcessDefinitionId,
        current_node_id: Option<NodeId>,
        status: InstanceStatus,
        context: Map<String, Value>,
    ) -> StoreResult<ProcessInstance> {
        let now = Utc::now();
        let instance = ProcessInstance {
            id: InstanceId::generate(),
            document_number: self.document_sequence.fetch_add(1, Ordering::SeqCst) + 1,
            process_definition_id,
            current_node_id,
            status,
            context,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .await
            .instances
            .insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn instance(&self, id: &InstanceId) -> StoreResult<Option<ProcessInstance>> {
        Ok(self.tables.read().await.instances.get(id).cloned())
    }

    async fn list_instances(&self) -> StoreResult<Vec<ProcessInstance>> {
        let tables = self.tables.read().await;
        let mut instances: Vec<_> = tables.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.document_number);
        Ok(instances)
    }

    async fn update_instance(&self, instance: &ProcessInstance) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.instances.get_mut(&instance.id) {
            Some(stored) => {
                *stored = instance.clone();
                Ok(())
            }
            None => Err(StoreError::InstanceNotFound(instance.id)),
        }
    }

    async fn submission(
        &self,
        instance_id: &InstanceId,
        node_id: &NodeId,
    ) -> StoreResult<Option<FormSubmission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .submissions
            .get(&(*instance_id, node_id.clone()))
            .cloned())
    }

    async fn upsert_submission(&self, submission: FormSubmission) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        upsert(&mut tables, submission);
        Ok(())
    }

    async fn commit_submission(
        &self,
        submission: FormSubmission,
        instance: &ProcessInstance,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.instances.contains_key(&instance.id) {
            return Err(StoreError::InstanceNotFound(instance.id));
        }
        upsert(&mut tables, submission);
        tables.instances.insert(instance.id, instance.clone());
        Ok(())
    }
}

/// Replace data and timestamp but keep the id of an existing submission
fn upsert(tables: &mut InstanceTables, mut submission: FormSubmission) {
    let key = (submission.process_instance_id, submission.node_id.clone());
    if let Some(existing) = tables.submissions.get(&key) {
        submission.id = existing.id;
    }
    tables.submissions.insert(key, submission);
}
