//! Trigger expression language.
//!
//! A small boolean grammar over the live environment snapshot, evaluated
//! just-in-time before each firing:
//!
//! ```text
//! expr   := conj ( 'or'  conj )*
//! conj   := atom ( 'and' atom )*
//! atom   := ident cmp literal | '(' expr ')'
//! cmp    := '>' | '<' | '>=' | '<=' | '==' | '!='
//! literal:= number | quoted-string
//! ```
//!
//! Evaluation fails closed: an unresolved identifier or a comparison
//! between mismatched types yields `false`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScheduleError};
use crate::snapshot::{SnapshotValue, SnapshotView};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl Comparison {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    fn apply<T: PartialOrd>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric literal.
    Number(f64),
    /// Quoted string literal.
    Text(String),
}

/// A parsed trigger expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerExpr {
    /// Disjunction of two or more conjunctions.
    Or(Vec<TriggerExpr>),
    /// Conjunction of two or more atoms.
    And(Vec<TriggerExpr>),
    /// A single comparison against the snapshot.
    Cmp {
        /// Dotted snapshot key.
        key: String,
        /// Operator.
        op: Comparison,
        /// Right-hand literal.
        literal: Literal,
    },
}

impl TriggerExpr {
    /// Parse a trigger expression. Used both at admission (syntax check
    /// only) and on the node before evaluation.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(ScheduleError::InvalidTrigger(format!(
                "unexpected trailing token '{}'",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a point-in-time snapshot view.
    #[must_use]
    pub fn eval(&self, view: &SnapshotView) -> bool {
        match self {
            Self::Or(parts) => parts.iter().any(|p| p.eval(view)),
            Self::And(parts) => parts.iter().all(|p| p.eval(view)),
            Self::Cmp { key, op, literal } => match (view.get(key), literal) {
                (Some(SnapshotValue::Number(actual)), Literal::Number(expected)) => {
                    op.apply(actual, expected)
                }
                (Some(SnapshotValue::Text(actual)), Literal::Text(expected)) => {
                    op.apply(&actual.as_str(), &expected.as_str())
                }
                // Unknown key or mismatched types fail closed.
                _ => false,
            },
        }
    }
}

impl fmt::Display for TriggerExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Or(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    match part {
                        Self::Or(_) => write!(f, "( {part} )")?,
                        _ => write!(f, "{part}")?,
                    }
                }
                Ok(())
            }
            Self::Cmp { key, op, literal } => match literal {
                Literal::Number(n) => write!(f, "{key} {} {n}", op.as_str()),
                Literal::Text(s) => write!(f, "{key} {} \"{s}\"", op.as_str()),
            },
        }
    }
}

impl FromStr for TriggerExpr {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Cmp(Comparison),
    Number(f64),
    Text(String),
    Open,
    Close,
    Or,
    And,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "{s}"),
            Self::Cmp(op) => write!(f, "{}", op.as_str()),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Open => write!(f, "("),
            Self::Close => write!(f, ")"),
            Self::Or => write!(f, "or"),
            Self::And => write!(f, "and"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                        None => {
                            return Err(ScheduleError::InvalidTrigger(
                                "unterminated string literal".to_owned(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            '>' | '<' | '=' | '!' => {
                chars.next();
                let eq = chars.peek() == Some(&'=');
                if eq {
                    chars.next();
                }
                let op = match (c, eq) {
                    ('>', false) => Comparison::Gt,
                    ('<', false) => Comparison::Lt,
                    ('>', true) => Comparison::Ge,
                    ('<', true) => Comparison::Le,
                    ('=', true) => Comparison::Eq,
                    ('!', true) => Comparison::Ne,
                    _ => {
                        return Err(ScheduleError::InvalidTrigger(format!(
                            "unknown operator '{c}'"
                        )))
                    }
                };
                tokens.push(Token::Cmp(op));
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let mut number = String::new();
                number.push(c);
                chars.next();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        number.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number.parse::<f64>().map_err(|_| {
                    ScheduleError::InvalidTrigger(format!("bad number literal '{number}'"))
                })?;
                tokens.push(Token::Number(value));
            }
            _ if is_ident_start(c) => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if is_ident_char(ch) {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "or" => Token::Or,
                    "and" => Token::And,
                    _ => Token::Ident(ident),
                });
            }
            _ => {
                return Err(ScheduleError::InvalidTrigger(format!(
                    "unexpected character '{c}'"
                )))
            }
        }
    }

    if tokens.is_empty() {
        return Err(ScheduleError::InvalidTrigger("empty expression".to_owned()));
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

fn describe(token: Option<Token>) -> String {
    token.map_or_else(|| "end of input".to_owned(), |t| t.to_string())
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<TriggerExpr> {
        let mut parts = vec![self.conj()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            parts.push(self.conj()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            TriggerExpr::Or(parts)
        })
    }

    fn conj(&mut self) -> Result<TriggerExpr> {
        let mut parts = vec![self.atom()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            parts.push(self.atom()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            TriggerExpr::And(parts)
        })
    }

    fn atom(&mut self) -> Result<TriggerExpr> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(ScheduleError::InvalidTrigger(
                        "expected closing parenthesis".to_owned(),
                    )),
                }
            }
            Some(Token::Ident(key)) => {
                let op = match self.next() {
                    Some(Token::Cmp(op)) => op,
                    other => {
                        return Err(ScheduleError::InvalidTrigger(format!(
                            "expected comparison after '{key}', got {}",
                            describe(other)
                        )))
                    }
                };
                let literal = match self.next() {
                    Some(Token::Number(n)) => Literal::Number(n),
                    Some(Token::Text(s)) => Literal::Text(s),
                    other => {
                        return Err(ScheduleError::InvalidTrigger(format!(
                            "expected literal after comparison, got {}",
                            describe(other)
                        )))
                    }
                };
                Ok(TriggerExpr::Cmp { key, op, literal })
            }
            other => Err(ScheduleError::InvalidTrigger(format!(
                "expected identifier or '(', got {}",
                describe(other)
            ))),
        }
    }
}
