//! Isolated execution of project validator scripts
//!
//! Validators are untrusted author code. Each invocation runs on a bounded
//! blocking pool with a wall-clock limit and an interpreter step budget,
//! and sees only a copy of the context it is given. A validator that fails
//! to compile, errors or times out is logged and then treated as absent
//! (field visibility) or as a denial (step access).

pub mod engine;
pub mod pool;
pub mod script;

pub use engine::{DslEngine, ScriptEngine};
pub use pool::{PoolError, WorkerPool};
pub use script::{CompiledScript, PermissionMap, ScriptError};

use crate::config::SandboxConfig;
use crate::core::{Validator, ValidatorKind};
use crate::rules::Meter;
use crate::types::NodeId;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
enum InvocationError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Clone)]
pub struct ValidatorSandbox {
    pool: WorkerPool,
    engine: Arc<dyn ScriptEngine>,
    fuel: u64,
}

impl std::fmt::Debug for ValidatorSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorSandbox")
            .field("pool", &self.pool)
            .field("fuel", &self.fuel)
            .finish_non_exhaustive()
    }
}

impl ValidatorSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self::with_engine(config, Arc::new(DslEngine))
    }

    pub fn with_engine(config: &SandboxConfig, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            pool: WorkerPool::new(config.max_concurrency, config.timeout()),
            engine,
            fuel: config.fuel,
        }
    }

    /// Merge the field permissions of every visibility validator, later
    /// validators overriding earlier ones on the same field.
    pub async fn field_permissions(
        &self,
        validators: &[&Validator],
        context: &Map<String, Value>,
    ) -> PermissionMap {
        let context = Arc::new(context.clone());
        let handles: Vec<_> = validators
            .iter()
            .filter(|v| v.kind == ValidatorKind::FieldVisibility && !v.code.trim().is_empty())
            .map(|validator| {
                let engine = Arc::clone(&self.engine);
                let context = Arc::clone(&context);
                let code = validator.code.clone();
                let fuel = self.fuel;
                let handle = self.spawn(move |deadline| {
                    let mut meter = Meter::new(fuel, deadline);
                    engine.field_visibility(&code, &context, &mut meter)
                });
                (validator.key.clone(), handle)
            })
            .collect();

        let mut merged = PermissionMap::new();
        for (key, handle) in handles {
            match join(handle).await {
                Ok(permissions) => merged.extend(permissions),
                Err(err) => {
                    tracing::warn!(validator = %key, error = %err, "field visibility validator skipped");
                }
            }
        }
        merged
    }

    /// Whether every step access validator allows moving to `target`.
    ///
    /// `context` receives `node_id = target`. No validators means allowed;
    /// any failure means denied.
    pub async fn step_allowed(
        &self,
        validators: &[&Validator],
        context: &Map<String, Value>,
        target: &NodeId,
    ) -> bool {
        let mut context = context.clone();
        context.insert("node_id".into(), Value::String(target.to_string()));
        let context = Arc::new(context);

        let handles: Vec<_> = validators
            .iter()
            .filter(|v| v.kind == ValidatorKind::StepAccess && !v.code.trim().is_empty())
            .map(|validator| {
                let engine = Arc::clone(&self.engine);
                let context = Arc::clone(&context);
                let code = validator.code.clone();
                let target = target.clone();
                let fuel = self.fuel;
                let handle = self.spawn(move |deadline| {
                    let mut meter = Meter::new(fuel, deadline);
                    engine.step_access(&code, &context, &target, &mut meter)
                });
                (validator.key.clone(), handle)
            })
            .collect();

        let mut allowed = true;
        for (key, handle) in handles {
            match join(handle).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(validator = %key, target = %target, "step access denied");
                    allowed = false;
                }
                Err(err) => {
                    tracing::warn!(validator = %key, target = %target, error = %err, "step access validator failed, denying");
                    allowed = false;
                }
            }
        }
        allowed
    }

    /// Stop accepting validator runs. Later calls see every validator as
    /// failed.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn spawn<F, T>(&self, job: F) -> JoinHandle<Result<T, InvocationError>>
    where
        F: FnOnce(std::time::Instant) -> Result<T, ScriptError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::spawn(async move { Ok::<T, InvocationError>(pool.run(job).await??) })
    }
}

async fn join<T>(handle: JoinHandle<Result<T, InvocationError>>) -> Result<T, InvocationError> {
    handle
        .await
        .map_err(|e| InvocationError::Pool(PoolError::Worker(e.to_string())))?
}
