//! Condition expressions: parsing and evaluation
//!
//! Grammar (lowest precedence first, all left-associative):
//!
//! ```text
//! or         := and ("or" and)*
//! and        := comparison ("and" comparison)*
//! comparison := primary (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") primary)?
//! primary    := "(" or ")" | "[" (primary ","?)* "]" | string | number | bool | path
//! ```
//!
//! Expressions are pure: they read the context and nothing else. `and`
//! and `or` evaluate both operands, so a type error on either side fails
//! the whole expression.

use super::lexer::{CmpOp, Lexer, Token, TokenKind};
use super::ExpressionError;
use crate::types::NonEmptyVec;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::Instant;

/// Deepest tree the parser will build. Each bracket, parenthesis and
/// `and`/`or` link counts one level.
pub const MAX_DEPTH: usize = 128;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    /// Dotted context lookup, one segment per key
    Path(NonEmptyVec<String>),
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed expression, reusable across contexts
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    root: Expr,
}

/// Step budget and deadline for one evaluation
#[derive(Debug)]
pub struct Meter {
    fuel: Option<u64>,
    deadline: Option<Instant>,
}

impl Meter {
    pub fn unlimited() -> Self {
        Self {
            fuel: None,
            deadline: None,
        }
    }

    pub fn new(fuel: u64, deadline: Instant) -> Self {
        Self {
            fuel: Some(fuel),
            deadline: Some(deadline),
        }
    }

    pub fn tick(&mut self) -> Result<(), ExpressionError> {
        if let Some(fuel) = self.fuel.as_mut() {
            if *fuel == 0 {
                return Err(ExpressionError::FuelExhausted);
            }
            *fuel -= 1;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ExpressionError::DeadlineExceeded);
        }
        Ok(())
    }
}

impl Expression {
    pub fn parse(src: &str) -> Result<Self, ExpressionError> {
        let tokens = Lexer::new(src).tokenize()?;
        Self::from_tokens(&tokens)
    }

    /// Parse a complete token slice; leftover tokens are an error
    pub fn from_tokens(tokens: &[Token]) -> Result<Self, ExpressionError> {
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_or()?;
        if let Some(extra) = tokens.get(parser.pos) {
            return Err(ExpressionError::TrailingInput {
                col: extra.col,
                found: extra.describe(),
            });
        }
        Ok(Self { root })
    }

    pub fn eval(&self, context: &Map<String, Value>) -> Result<Value, ExpressionError> {
        self.eval_metered(context, &mut Meter::unlimited())
    }

    pub fn eval_metered(
        &self,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<Value, ExpressionError> {
        eval_expr(&self.root, context, meter)
    }

    /// Evaluate and coerce to truthiness
    pub fn holds(
        &self,
        context: &Map<String, Value>,
        meter: &mut Meter,
    ) -> Result<bool, ExpressionError> {
        Ok(truthy(&self.eval_metered(context, meter)?))
    }
}

/// Evaluate a condition against `context`.
///
/// Blank conditions hold. Anything that fails to lex, parse or evaluate
/// does not.
pub fn evaluate(expression: &str, context: &Map<String, Value>) -> bool {
    if expression.trim().is_empty() {
        return true;
    }
    match Expression::parse(expression).and_then(|e| e.holds(context, &mut Meter::unlimited())) {
        Ok(result) => result,
        Err(err) => {
            tracing::debug!(expression, error = %err, "condition evaluation failed");
            false
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn next(&mut self) -> Result<&'a Token, ExpressionError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    /// Count one more level of nesting at the current token
    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let col = self.tokens.get(self.pos).map_or(0, |t| t.col);
            return Err(ExpressionError::TooDeep {
                col,
                limit: MAX_DEPTH,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.peek() == Some(&TokenKind::Or) {
            self.descend()?;
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&TokenKind::And) {
            self.descend()?;
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_primary()?;
        if let Some(TokenKind::Cmp(op)) = self.peek() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self.next()?;
        match &token.kind {
            TokenKind::OpenParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next()? {
                    Token {
                        kind: TokenKind::CloseParen,
                        ..
                    } => Ok(inner),
                    other => Err(unexpected(other, "')'")),
                }
            }
            TokenKind::OpenBracket => {
                self.descend()?;
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(TokenKind::CloseBracket) => {
                            self.pos += 1;
                            self.depth -= 1;
                            return Ok(Expr::List(items));
                        }
                        None => return Err(ExpressionError::UnexpectedEnd),
                        Some(_) => {
                            items.push(self.parse_primary()?);
                            if self.peek() == Some(&TokenKind::Comma) {
                                self.pos += 1;
                            }
                        }
                    }
                }
            }
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            TokenKind::Num(n) => Ok(Expr::Literal(Value::Number(n.clone()))),
            TokenKind::Bool(b) => Ok(Expr::Literal(Value::Bool(*b))),
            TokenKind::Ident(path) => {
                let segments = path.split('.').map(str::to_string).collect();
                NonEmptyVec::from_vec(segments)
                    .map(Expr::Path)
                    .ok_or_else(|| unexpected(token, "identifier"))
            }
            _ => Err(unexpected(token, "value")),
        }
    }
}

fn unexpected(token: &Token, expected: &str) -> ExpressionError {
    ExpressionError::UnexpectedToken {
        col: token.col,
        expected: expected.to_string(),
        found: token.describe(),
    }
}

fn eval_expr(
    expr: &Expr,
    ctx: &Map<String, Value>,
    meter: &mut Meter,
) -> Result<Value, ExpressionError> {
    meter.tick()?;
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval_expr(item, ctx, meter))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Path(segments) => Ok(resolve_path(segments, ctx)),
        Expr::Compare { op, left, right } => {
            let l = eval_expr(left, ctx, meter)?;
            let r = eval_expr(right, ctx, meter)?;
            compare(*op, &l, &r).map(Value::Bool)
        }
        Expr::And(left, right) => {
            let l = truthy(&eval_expr(left, ctx, meter)?);
            let r = truthy(&eval_expr(right, ctx, meter)?);
            Ok(Value::Bool(l && r))
        }
        Expr::Or(left, right) => {
            let l = truthy(&eval_expr(left, ctx, meter)?);
            let r = truthy(&eval_expr(right, ctx, meter)?);
            Ok(Value::Bool(l || r))
        }
    }
}

fn resolve_path(segments: &NonEmptyVec<String>, ctx: &Map<String, Value>) -> Value {
    let Some(mut current) = ctx.get(segments.first()) else {
        return Value::Null;
    };
    for segment in segments.iter().skip(1) {
        match current.as_object().and_then(|obj| obj.get(segment)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CmpOp::Eq => Ok(loose_eq(left, right)),
        CmpOp::Ne => Ok(!loose_eq(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(false);
            }
            let ord = order(left, right)?;
            Ok(match op {
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

/// Numbers and booleans compare numerically with each other
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Bool(_), Value::Number(_)) | (Value::Number(_), Value::Bool(_)) => {
            as_number(left) == as_number(right)
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| loose_eq(v, other)))
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    if let (Some(a), Some(b)) = (as_number(left), as_number(right)) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| ExpressionError::Type("numbers are not comparable".into()));
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                if !loose_eq(x, y) {
                    return order(x, y);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(ExpressionError::Type(format!(
            "cannot order {} against {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExpressionError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(needle, item))),
        Value::String(text) => match needle {
            Value::String(part) => Ok(text.contains(part.as_str())),
            other => Err(ExpressionError::Type(format!(
                "'in <string>' requires a string, got {}",
                type_name(other)
            ))),
        },
        _ => Ok(false),
    }
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
