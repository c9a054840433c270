//! Field access rules: ordered, first match wins

use super::expression::evaluate;
use crate::core::{FieldAccessRule, Permission};
use serde_json::{Map, Value};

/// Resolve a field's permission from its rules.
///
/// A rule matches when its role is among the context's `role_ids`, or when
/// its expression holds. The first matching rule's permission is returned;
/// `default` when none match.
pub fn resolve(
    rules: &[FieldAccessRule],
    context: &Map<String, Value>,
    default: Permission,
) -> Permission {
    let roles = context.get("role_ids").and_then(Value::as_array);
    for rule in rules {
        if let (Some(role_id), Some(roles)) = (&rule.role_id, roles) {
            if roles.iter().any(|r| r.as_str() == Some(role_id.as_str())) {
                return rule.permission;
            }
        }
        if let Some(expression) = rule.expression.as_deref() {
            if !expression.is_empty() && evaluate(expression, context) {
                return rule.permission;
            }
        }
    }
    default
}
