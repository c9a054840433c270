//! Document workflow runtime.
//!
//! Drives document instances through a process graph of form steps:
//!
//! - [`core`] holds the typed process, form, project and instance model
//! - [`rules`] evaluates transition conditions and field access rules
//! - [`sandbox`] runs author-written validator scripts under a bounded pool
//! - [`store`] declares the persistence collaborators and an in-memory store
//! - [`runtime`] is the per-instance state machine tying it together

#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod rules;
pub mod runtime;
pub mod sandbox;
pub mod store;
pub mod telemetry;
pub mod types;

pub use crate::config::RuntimeConfig;
pub use crate::error::{DefinitionError, RuntimeError, RuntimeResult, StateMismatchError};
pub use crate::runtime::{CurrentForm, RuntimeService, SubmitOutcome, SubmitRequest};
pub use crate::store::{DefinitionStore, InMemoryStore, InstanceStore};
