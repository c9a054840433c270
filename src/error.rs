//! Errors surfaced by the runtime
//!
//! Problems in author-written conditions and validators never show up here;
//! they are absorbed where they are evaluated.

use crate::core::InstanceStatus;
use crate::types::{EdgeKey, FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId};
use thiserror::Error;

/// A process or form definition is missing or malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("process definition not found: {0}")]
    ProcessNotFound(ProcessDefinitionId),

    #[error("process definition {0} has no start node")]
    NoStartNode(ProcessDefinitionId),

    #[error("node '{node}' not found in process definition {process}")]
    NodeNotFound {
        process: ProcessDefinitionId,
        node: NodeId,
    },

    #[error("form definition not found: {0}")]
    FormNotFound(FormDefinitionId),
}

/// The request does not fit the instance's current state. Nothing was
/// changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMismatchError {
    #[error("instance {id} is {status}, not active")]
    NotActive {
        id: InstanceId,
        status: InstanceStatus,
    },

    #[error("node '{given}' is not the current node ({current:?})")]
    NodeMismatch {
        given: NodeId,
        current: Option<NodeId>,
    },

    #[error("form {given} is not bound to node '{node}'")]
    FormMismatch {
        node: NodeId,
        given: FormDefinitionId,
    },

    #[error("no transition out of node '{0}' is available")]
    NoAvailableTransition(NodeId),

    #[error("transition '{key}' out of node '{node}' is not available")]
    TransitionNotAvailable { node: NodeId, key: EdgeKey },
}

/// Failure of a persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    StateMismatch(#[from] StateMismatchError),

    #[error("process instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// True for rejections caused by the request rather than the system
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RuntimeError::StateMismatch(_) | RuntimeError::InstanceNotFound(_)
        )
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
