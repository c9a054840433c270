//! Lexer for condition expressions and validator script lines
//!
//! Keywords are recognised on word boundaries only, so `index` is an
//! identifier rather than `in` followed by `dex`.

use super::ExpressionError;
use serde_json::Number;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    /// Single `=`, only meaningful in validator scripts
    Assign,
    Cmp(CmpOp),
    And,
    Or,
    Str(String),
    Num(Number),
    Bool(bool),
    /// Possibly dotted: `approval.amount`
    Ident(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Column of the first character (1-based)
    pub col: usize,
}

impl Token {
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::OpenParen => "(".into(),
            TokenKind::CloseParen => ")".into(),
            TokenKind::OpenBracket => "[".into(),
            TokenKind::CloseBracket => "]".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Assign => "=".into(),
            TokenKind::Cmp(op) => op.symbol().into(),
            TokenKind::And => "and".into(),
            TokenKind::Or => "or".into(),
            TokenKind::Str(s) => format!("'{s}'"),
            TokenKind::Num(n) => n.to_string(),
            TokenKind::Bool(b) => b.to_string(),
            TokenKind::Ident(name) => name.clone(),
        }
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();
        loop {
            while self.peek_at(0).is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
            if self.pos >= self.input.len() {
                return Ok(tokens);
            }
            tokens.push(self.next_token()?);
        }
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        let col = self.pos + 1;
        let ch = self.input[self.pos];
        let two = (ch, self.peek_at(1));

        let simple = match two {
            ('=', Some('=')) => Some((TokenKind::Cmp(CmpOp::Eq), 2)),
            ('!', Some('=')) => Some((TokenKind::Cmp(CmpOp::Ne), 2)),
            ('<', Some('=')) => Some((TokenKind::Cmp(CmpOp::Le), 2)),
            ('>', Some('=')) => Some((TokenKind::Cmp(CmpOp::Ge), 2)),
            ('<', _) => Some((TokenKind::Cmp(CmpOp::Lt), 1)),
            ('>', _) => Some((TokenKind::Cmp(CmpOp::Gt), 1)),
            ('=', _) => Some((TokenKind::Assign, 1)),
            ('(', _) => Some((TokenKind::OpenParen, 1)),
            (')', _) => Some((TokenKind::CloseParen, 1)),
            ('[', _) => Some((TokenKind::OpenBracket, 1)),
            (']', _) => Some((TokenKind::CloseBracket, 1)),
            (',', _) => Some((TokenKind::Comma, 1)),
            _ => None,
        };
        if let Some((kind, width)) = simple {
            self.pos += width;
            return Ok(Token { kind, col });
        }

        match ch {
            '\'' | '"' => self.read_string(col),
            c if c.is_ascii_digit() => self.read_number(col),
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(col),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_word(col)),
            other => Err(ExpressionError::Lex {
                col,
                message: format!("unexpected character '{other}'"),
            }),
        }
    }

    fn read_string(&mut self, col: usize) -> Result<Token, ExpressionError> {
        let quote = self.input[self.pos];
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek_at(0) {
                None => {
                    return Err(ExpressionError::Lex {
                        col,
                        message: "unterminated string literal".into(),
                    })
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(Token {
                        kind: TokenKind::Str(text),
                        col,
                    });
                }
                Some('\\') => {
                    match self.peek_at(1) {
                        Some(q @ ('\'' | '"' | '\\')) => text.push(q),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => text.push('\\'),
                    }
                    self.pos += 2;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_number(&mut self, col: usize) -> Result<Token, ExpressionError> {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.input[start..self.pos].iter().collect();
        let invalid = || ExpressionError::InvalidNumber(text.clone());

        let number = if text.contains('.') {
            let value: f64 = text.parse().map_err(|_| invalid())?;
            Number::from_f64(value).ok_or_else(invalid)?
        } else if let Ok(int) = text.parse::<i64>() {
            Number::from(int)
        } else {
            let value: f64 = text.parse().map_err(|_| invalid())?;
            Number::from_f64(value).ok_or_else(invalid)?
        };
        Ok(Token {
            kind: TokenKind::Num(number),
            col,
        })
    }

    fn read_word(&mut self, col: usize) -> Token {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        let word: String = self.input[start..self.pos].iter().collect();
        let kind = match word.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "in" => TokenKind::Cmp(CmpOp::In),
            "true" | "yes" => TokenKind::Bool(true),
            "false" | "no" => TokenKind::Bool(false),
            _ => TokenKind::Ident(word),
        };
        Token { kind, col }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
