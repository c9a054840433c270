//! Validator script language
//!
//! Scripts are line oriented. `#` and `//` start comments. Conditions use
//! the expression grammar from [`crate::rules`].
//!
//! Field visibility scripts set permissions, later lines overriding
//! earlier ones:
//!
//! ```text
//! hidden salary, bonus when amount < 1000
//! read   approver_comment when 'manager' in role_ids
//! write  notes
//! ```
//!
//! Step access scripts either decide with rules, where the first rule whose
//! guard holds wins and no match denies:
//!
//! ```text
//! deny  when node_id == 'payout' and amount > 5000
//! allow when 'manager' in role_ids
//! ```
//!
//! or assign a result directly; the last assignment decides:
//!
//! ```text
//! allowed = 'manager' in role_ids
//! ```

use crate::core::{Permission, ValidatorKind};
use crate::rules::lexer::{Lexer, Token, TokenKind};
use crate::rules::{Expression, ExpressionError, Meter};
use crate::types::NonEmptyVec;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field name to permission, as produced by visibility scripts
pub type PermissionMap = BTreeMap<String, Permission>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Compile { line: usize, message: String },

    #[error("runtime error: {0}")]
    Runtime(#[from] ExpressionError),
}

#[derive(Debug, Clone, PartialEq)]
struct Visibility {
    permission: Permission,
    fields: NonEmptyVec<String>,
    guard: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq)]
struct AccessRule {
    decision: Decision,
    guard: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
enum AccessProgram {
    Empty,
    Rules(Vec<AccessRule>),
    Assignments(Vec<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
enum Program {
    FieldVisibility(Vec<Visibility>),
    StepAccess(AccessProgram),
}

/// A validator script compiled to its statement list
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    program: Program,
}

impl CompiledScript {
    pub fn compile(code: &str, kind: ValidatorKind) -> Result<Self, ScriptError> {
        let mut visibility = Vec::new();
        let mut rules = Vec::new();
        let mut assignments = Vec::new();
        // first line of each step access form, for mixing errors
        let mut rule_line = None;
        let mut assign_line = None;

        for (index, raw) in code.lines().enumerate() {
            let line = index + 1;
            let text = strip_comment(raw);
            if text.trim().is_empty() {
                continue;
            }
            let tokens = Lexer::new(text)
                .tokenize()
                .map_err(|e| compile_error(line, e.to_string()))?;
            let Some(first) = tokens.first() else {
                continue;
            };
            let keyword = first.ident().ok_or_else(|| {
                compile_error(line, format!("expected a statement, found '{}'", first.describe()))
            })?;

            match (kind, keyword) {
                (ValidatorKind::FieldVisibility, "hidden" | "read" | "write") => {
                    let permission = Permission::parse(keyword)
                        .ok_or_else(|| compile_error(line, format!("unknown permission '{keyword}'")))?;
                    visibility.push(parse_visibility(line, permission, &tokens[1..])?);
                }
                (ValidatorKind::StepAccess, "allow" | "deny") => {
                    let decision = if keyword == "allow" {
                        Decision::Allow
                    } else {
                        Decision::Deny
                    };
                    let guard = parse_guard(line, &tokens[1..])?;
                    rules.push(AccessRule { decision, guard });
                    rule_line.get_or_insert(line);
                }
                (ValidatorKind::StepAccess, "result" | "allowed") => {
                    match tokens.get(1).map(|t| &t.kind) {
                        Some(TokenKind::Assign) => {}
                        _ => return Err(compile_error(line, format!("expected '=' after '{keyword}'"))),
                    }
                    let expr = Expression::from_tokens(&tokens[2..])
                        .map_err(|e| compile_error(line, e.to_string()))?;
                    assignments.push(expr);
                    assign_line.get_or_insert(line);
                }
                (_, other) => {
                    return Err(compile_error(
                        line,
                        format!("'{other}' is not a {} statement", kind.as_str()),
                    ))
                }
            }
        }

        let program = match kind {
            ValidatorKind::FieldVisibility => Program::FieldVisibility(visibility),
            ValidatorKind::StepAccess => match (rule_line, assign_line) {
                (None, None) => Program::StepAccess(AccessProgram::Empty),
                (Some(_), None) => Program::StepAccess(AccessProgram::Rules(rules)),
                (None, Some(_)) => Program::StepAccess(AccessProgram::Assignments(assignments)),
                (Some(a), Some(b)) => {
                    return Err(compile_error(
                        a.max(b),
                        "allow/deny rules and result assignments cannot be mixed".into(),
                    ))
                }
            },
        };
        Ok(Self { program })
    }

    /// Run a visibility script. Returns an empty map for step access
    /// scripts.
    pub fn field_permissions(
        &self,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<PermissionMap, ScriptError> {
        let mut permissions = PermissionMap::new();
        let Program::FieldVisibility(statements) = &self.program else {
            return Ok(permissions);
        };
        for statement in statements {
            let applies = match &statement.guard {
                Some(guard) => guard.holds(context, meter)?,
                None => true,
            };
            if applies {
                for field in statement.fields.iter() {
                    permissions.insert(field.clone(), statement.permission);
                }
            }
        }
        Ok(permissions)
    }

    /// Run a step access script. Visibility scripts have no opinion and
    /// allow.
    pub fn allows(
        &self,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<bool, ScriptError> {
        let Program::StepAccess(program) = &self.program else {
            return Ok(true);
        };
        match program {
            AccessProgram::Empty => Ok(true),
            AccessProgram::Rules(rules) => {
                for rule in rules {
                    let matched = match &rule.guard {
                        Some(guard) => guard.holds(context, meter)?,
                        None => true,
                    };
                    if matched {
                        return Ok(rule.decision == Decision::Allow);
                    }
                }
                Ok(false)
            }
            AccessProgram::Assignments(assignments) => {
                let mut result = true;
                for expr in assignments {
                    result = expr.holds(context, meter)?;
                }
                Ok(result)
            }
        }
    }
}

fn compile_error(line: usize, message: String) -> ScriptError {
    ScriptError::Compile { line, message }
}

/// Cut a trailing `#` or `//` comment, ignoring markers inside quotes
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev_slash = false;
    for (i, ch) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '#' => return &line[..i],
            '/' if prev_slash => return &line[..i - 1],
            _ => {}
        }
        prev_slash = ch == '/';
    }
    line
}

fn parse_visibility(
    line: usize,
    permission: Permission,
    tokens: &[Token],
) -> Result<Visibility, ScriptError> {
    let mut fields: Vec<String> = Vec::new();
    let mut pos = 0;
    while let Some(token) = tokens.get(pos) {
        if fields.is_empty() && token.ident() == Some("when") {
            break;
        }
        let name = token.ident().ok_or_else(|| {
            compile_error(line, format!("expected a field name, found '{}'", token.describe()))
        })?;
        if fields.iter().any(|f| f == name) {
            return Err(compile_error(line, format!("field '{name}' listed twice")));
        }
        fields.push(name.to_string());
        pos += 1;
        match tokens.get(pos) {
            None => break,
            Some(t) if t.ident() == Some("when") => break,
            Some(t) if t.kind == TokenKind::Comma => {
                pos += 1;
                if tokens.get(pos).map_or(true, |t| t.ident() == Some("when")) {
                    return Err(compile_error(line, "expected a field name after ','".to_string()));
                }
            }
            Some(t) => {
                return Err(compile_error(
                    line,
                    format!("expected ',' or 'when' after '{name}', found '{}'", t.describe()),
                ))
            }
        }
    }
    let fields = NonEmptyVec::from_vec(fields)
        .ok_or_else(|| compile_error(line, format!("'{permission}' needs at least one field")))?;
    let guard = parse_guard(line, &tokens[pos..])?;
    Ok(Visibility {
        permission,
        fields,
        guard,
    })
}

/// Nothing, or `when <expression>`
fn parse_guard(line: usize, tokens: &[Token]) -> Result<Option<Expression>, ScriptError> {
    let Some(first) = tokens.first() else {
        return Ok(None);
    };
    if first.ident() != Some("when") {
        return Err(compile_error(
            line,
            format!("expected 'when', found '{}'", first.describe()),
        ));
    }
    Expression::from_tokens(&tokens[1..])
        .map(Some)
        .map_err(|e| compile_error(line, format!("bad condition: {e}")))
}
