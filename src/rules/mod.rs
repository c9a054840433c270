//! Author-written conditions: transition expressions and field access rules
//!
//! Conditions are executed on every transition and written by
//! non-engineers, so evaluation is total. [`evaluate`] never fails; any
//! lexing, parsing or type problem yields `false`.

pub mod access;
pub mod expression;
pub mod lexer;

pub use access::resolve as resolve_access;
pub use expression::{evaluate, Expression, Meter};

/// Why an expression could not be parsed or evaluated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("column {col}: {message}")]
    Lex { col: usize, message: String },

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("column {col}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        col: usize,
        expected: String,
        found: String,
    },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("column {col}: unexpected '{found}' after complete expression")]
    TrailingInput { col: usize, found: String },

    #[error("column {col}: nested deeper than {limit} levels")]
    TooDeep { col: usize, limit: usize },

    #[error("type error: {0}")]
    Type(String),

    #[error("step budget exhausted")]
    FuelExhausted,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}
