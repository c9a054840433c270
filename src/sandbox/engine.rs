//! Script engines executing validator code

use super::script::{CompiledScript, PermissionMap, ScriptError};
use crate::core::ValidatorKind;
use crate::rules::Meter;
use crate::types::NodeId;
use serde_json::{Map, Value};

/// Executes one validator's code against a context.
///
/// Called from a blocking worker thread. Implementations must honour the
/// meter so a runaway script stops near its deadline.
pub trait ScriptEngine: Send + Sync {
    /// Field name to permission for the fields the script sets
    fn field_visibility(
        &self,
        code: &str,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<PermissionMap, ScriptError>;

    /// Whether the script permits moving to `target`. The context already
    /// carries `node_id`.
    fn step_access(
        &self,
        code: &str,
        context: &Map<String, Value>,
        target: &NodeId,
        meter: &mut Meter,
    ) -> Result<bool, ScriptError>;
}

/// The built-in declarative validator language
#[derive(Debug, Default, Clone, Copy)]
pub struct DslEngine;

impl ScriptEngine for DslEngine {
    fn field_visibility(
        &self,
        code: &str,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<PermissionMap, ScriptError> {
        CompiledScript::compile(code, ValidatorKind::FieldVisibility)?
            .field_permissions(context, meter)
    }

    fn step_access(
        &self,
        code: &str,
        context: &Map<String, Value>,
        _target: &NodeId,
        meter: &mut Meter,
    ) -> Result<bool, ScriptError> {
        CompiledScript::compile(code, ValidatorKind::StepAccess)?.allows(context, meter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Permission;
    use crate::rules::ExpressionError;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_dsl_engine_visibility() {
        let perms = DslEngine
            .field_visibility(
                "read total when status == 'sent'",
                &ctx(json!({"status": "sent"})),
                &mut Meter::unlimited(),
            )
            .unwrap();
        assert_eq!(perms.get("total"), Some(&Permission::Read));
    }

    #[test]
    fn test_dsl_engine_step_access() {
        let target = NodeId::new("approve");
        let context = ctx(json!({"node_id": "approve", "role_ids": ["boss"]}));
        let allowed = DslEngine
            .step_access(
                "allow when 'boss' in role_ids",
                &context,
                &target,
                &mut Meter::unlimited(),
            )
            .unwrap();
        assert!(allowed);
    }

    #[test]
    fn test_fuel_stops_script() {
        let code = (0..50)
            .map(|i| format!("hidden f{i} when a == 1 and b == 2 and c == 3"))
            .collect::<Vec<_>>()
            .join("\n");
        let deadline = Instant::now() + Duration::from_secs(60);
        let result = DslEngine.field_visibility(
            &code,
            &ctx(json!({"a": 1, "b": 2, "c": 3})),
            &mut Meter::new(20, deadline),
        );
        assert_eq!(
            result,
            Err(ScriptError::Runtime(ExpressionError::FuelExhausted))
        );
    }

    #[test]
    fn test_past_deadline_stops_script() {
        let deadline = Instant::now();
        let result = DslEngine.step_access(
            "result = a == 1",
            &ctx(json!({"a": 1})),
            &NodeId::new("x"),
            &mut Meter::new(1_000, deadline),
        );
        assert_eq!(
            result,
            Err(ScriptError::Runtime(ExpressionError::DeadlineExceeded))
        );
    }
}
