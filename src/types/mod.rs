//! Value types shared across the runtime

mod ids;
mod non_empty;

pub use ids::{
    CatalogId, EdgeId, EdgeKey, FormDefinitionId, InstanceId, NodeId, ProcessDefinitionId,
    ProjectId, RoleId, SubmissionId, ValidatorKey,
};
pub use non_empty::NonEmptyVec;
