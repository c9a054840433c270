//! Typed domain model: process graphs, forms, projects and instances
//!
//! Definitions, forms, projects and catalogs are owned by external
//! collaborators and read-only here. Instances and submissions are owned by
//! the runtime and only change through [`crate::runtime::RuntimeService`].

pub mod definitions;
pub mod form;
pub mod instance;
pub mod project;

pub use definitions::{Edge, GraphIssue, Node, NodeType, ProcessDefinition, Resolution};
pub use form::{
    Catalog, FieldAccessRule, FieldDefinition, FieldType, FormDefinition, Permission,
    SelectOption,
};
pub use instance::{FormSubmission, InstanceStatus, ProcessInstance};
pub use project::{Project, Validator, ValidatorKind};
