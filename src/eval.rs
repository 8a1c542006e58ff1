//! Expression Sandbox
//!
//! Interpolations (`{{ expr }}`), event-handler arguments, initializer statements
//! and method bodies run through this evaluator instead of a host `eval`. The
//! grammar is a bounded JavaScript subset: literals, member/index access,
//! instance method calls, a whitelist of globals, arithmetic, comparison,
//! logical operators and the ternary. Statements add assignments, `++`/`--`,
//! `const`/`let`, `if`/`else` and `return`.
//!
//! Values are `serde_json::Value`; `undefined` and `null` are both `Null`.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::lexer::{split_statements, tokenize, MethodSource, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("unknown store `{0}`")]
    UnknownStore(String),

    #[error("unknown action `{group}.{action}`")]
    UnknownAction { group: String, action: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("cannot assign to {0}")]
    NotAssignable(String),

    #[error("{0}")]
    Runtime(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// What an expression can see. Only `field` is required; the rest default to
/// "not available".
pub trait EvalScope {
    /// `this.name`
    fn field(&self, name: &str) -> Option<Value>;

    fn set_field(&self, name: &str, _value: Value) -> EvalResult<()> {
        Err(EvalError::NotAssignable(format!("this.{}", name)))
    }

    fn call_method(&self, name: &str, _args: Vec<Value>) -> EvalResult<Value> {
        Err(EvalError::UnknownMethod(name.to_string()))
    }

    /// Bare identifiers with no local binding.
    fn identifier(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_store(&self, _name: &str) -> bool {
        false
    }

    fn read_store(&self, store: &str, _prop: &str) -> EvalResult<Value> {
        Err(EvalError::UnknownStore(store.to_string()))
    }

    fn store_snapshot(&self, store: &str) -> EvalResult<Value> {
        Err(EvalError::UnknownStore(store.to_string()))
    }

    fn write_store(&self, store: &str, _prop: &str, _value: Value) -> EvalResult<()> {
        Err(EvalError::UnknownStore(store.to_string()))
    }

    fn has_actions(&self, _group: &str) -> bool {
        false
    }

    fn call_action(&self, group: &str, action: &str, _args: Vec<Value>) -> EvalResult<Value> {
        Err(EvalError::UnknownAction {
            group: group.to_string(),
            action: action.to_string(),
        })
    }
}

/// Plain value scope: a `this` object plus free identifiers.
#[derive(Debug, Clone, Default)]
pub struct ValueScope {
    pub this: Map<String, Value>,
    pub identifiers: Map<String, Value>,
}

impl ValueScope {
    pub fn with_identifier(mut self, name: &str, value: Value) -> Self {
        self.identifiers.insert(name.to_string(), value);
        self
    }
}

impl EvalScope for ValueScope {
    fn field(&self, name: &str) -> Option<Value> {
        self.this.get(name).cloned()
    }

    fn identifier(&self, name: &str) -> Option<Value> {
        self.identifiers.get(name).cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEntry {
    Property(String, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Template(Vec<TemplatePart>),
    Array(Vec<ArrayItem>),
    Object(Vec<ObjectEntry>),
    This,
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Field(String),
    Local(String),
    /// `store.prop` where the object evaluates to a store
    Member(Box<Expr>, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: AssignTarget,
        op: AssignOp,
        value: Expr,
    },
    Update {
        target: AssignTarget,
        delta: f64,
    },
    Let {
        name: String,
        value: Option<Expr>,
    },
    If {
        condition: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_expression(src: &str) -> EvalResult<Expr> {
    let mut parser = ExprParser::new(src);
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a statement list (method body or initializer).
pub fn parse_statements(src: &str) -> EvalResult<Vec<Stmt>> {
    split_statements(src)
        .iter()
        .map(|s| parse_statement(s))
        .collect()
}

pub fn parse_statement(src: &str) -> EvalResult<Stmt> {
    let mut parser = ExprParser::new(src);
    let stmt = parser.statement()?;
    parser.eat_punct(";");
    parser.expect_end()?;
    Ok(stmt)
}

fn binary_op(text: &str) -> Option<(BinaryOp, u8)> {
    let op = match text {
        "??" => (BinaryOp::Nullish, 1),
        "||" => (BinaryOp::Or, 1),
        "&&" => (BinaryOp::And, 2),
        "==" | "===" => (BinaryOp::Eq, 3),
        "!=" | "!==" => (BinaryOp::NotEq, 3),
        "<" => (BinaryOp::Lt, 4),
        ">" => (BinaryOp::Gt, 4),
        "<=" => (BinaryOp::LtEq, 4),
        ">=" => (BinaryOp::GtEq, 4),
        "+" => (BinaryOp::Add, 5),
        "-" => (BinaryOp::Sub, 5),
        "*" => (BinaryOp::Mul, 6),
        "/" => (BinaryOp::Div, 6),
        "%" => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

fn assign_op(text: &str) -> Option<AssignOp> {
    match text {
        "=" => Some(AssignOp::Set),
        "+=" => Some(AssignOp::Add),
        "-=" => Some(AssignOp::Sub),
        "*=" => Some(AssignOp::Mul),
        "/=" => Some(AssignOp::Div),
        "%=" => Some(AssignOp::Rem),
        _ => None,
    }
}

struct ExprParser<'s> {
    src: &'s str,
    tokens: Vec<Token<'s>>,
    pos: usize,
}

impl<'s> ExprParser<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            tokens: tokenize(src).into_iter().filter(|t| !t.is_trivia()).collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<Token<'s>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.peek().map_or(false, |t| t.is_punct(p))
    }

    fn peek_ident(&self, name: &str) -> bool {
        self.peek().map_or(false, |t| t.is_ident(name))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            offset: self.peek().map_or(self.src.len(), |t| t.start),
            message: message.into(),
        }
    }

    fn expect_punct(&mut self, p: &str) -> EvalResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", p)))
        }
    }

    fn expect_ident(&mut self) -> EvalResult<String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Ident => {
                self.pos += 1;
                Ok(t.text.to_string())
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn expect_end(&self) -> EvalResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error(format!("unexpected `{}`", t.text))),
        }
    }

    fn at_statement_end(&self) -> bool {
        self.peek().map_or(true, |t| t.is_punct(";") || t.is_punct("}"))
    }

    // ─── statements ──────────────────────────────────────────────────────────

    fn statement(&mut self) -> EvalResult<Stmt> {
        let Some(tok) = self.peek() else {
            return Err(self.error("expected statement"));
        };

        if tok.kind == TokenKind::Ident {
            match tok.text {
                "if" => return self.if_statement(),
                "const" | "let" | "var" => {
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    let value = if self.eat_punct("=") {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    return Ok(Stmt::Let { name, value });
                }
                "return" => {
                    self.pos += 1;
                    if self.at_statement_end() {
                        return Ok(Stmt::Return(None));
                    }
                    return Ok(Stmt::Return(Some(self.expression()?)));
                }
                _ => {}
            }
        }

        if tok.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }

        if tok.is_punct("++") || tok.is_punct("--") {
            self.pos += 1;
            let target = to_target(self.postfix()?)?;
            let delta = if tok.text == "++" { 1.0 } else { -1.0 };
            return Ok(Stmt::Update { target, delta });
        }

        let expr = self.expression()?;
        if let Some(next) = self.peek() {
            if next.kind == TokenKind::Punct {
                if let Some(op) = assign_op(next.text) {
                    self.pos += 1;
                    let value = self.expression()?;
                    return Ok(Stmt::Assign {
                        target: to_target(expr)?,
                        op,
                        value,
                    });
                }
                if next.text == "++" || next.text == "--" {
                    self.pos += 1;
                    let delta = if next.text == "++" { 1.0 } else { -1.0 };
                    return Ok(Stmt::Update {
                        target: to_target(expr)?,
                        delta,
                    });
                }
            }
        }
        Ok(Stmt::Expr(expr))
    }

    /// `{ ... }` parsed as its own statement list.
    fn block(&mut self) -> EvalResult<Vec<Stmt>> {
        let open = self.pos;
        let mut depth = 0;
        let mut close = None;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            if tok.is_punct("{") {
                depth += 1;
            } else if tok.is_punct("}") {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
        }
        let Some(close) = close else {
            return Err(self.error("unterminated block"));
        };
        let inner = &self.src[self.tokens[open].end()..self.tokens[close].start];
        self.pos = close + 1;
        parse_statements(inner)
    }

    fn branch(&mut self) -> EvalResult<Vec<Stmt>> {
        if self.peek_punct("{") {
            self.block()
        } else {
            let stmt = self.statement()?;
            self.eat_punct(";");
            Ok(vec![stmt])
        }
    }

    fn if_statement(&mut self) -> EvalResult<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;
        let condition = self.expression()?;
        self.expect_punct(")")?;
        let then = self.branch()?;
        let otherwise = if self.peek_ident("else") {
            self.pos += 1;
            if self.peek_ident("if") {
                vec![self.if_statement()?]
            } else {
                self.branch()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            condition,
            then,
            otherwise,
        })
    }

    // ─── expressions ─────────────────────────────────────────────────────────

    fn expression(&mut self) -> EvalResult<Expr> {
        let condition = self.binary(1)?;
        if self.eat_punct("?") {
            let consequent = self.expression()?;
            self.expect_punct(":")?;
            let alternate = self.expression()?;
            return Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(consequent),
                Box::new(alternate),
            ));
        }
        Ok(condition)
    }

    fn binary(&mut self, min_prec: u8) -> EvalResult<Expr> {
        let mut left = self.unary()?;
        while let Some(tok) = self.peek() {
            if tok.kind != TokenKind::Punct {
                break;
            }
            let Some((op, prec)) = binary_op(tok.text) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.binary(prec + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        let op = match self.peek() {
            Some(t) if t.is_punct("!") => Some(UnaryOp::Not),
            Some(t) if t.is_punct("-") => Some(UnaryOp::Neg),
            Some(t) if t.is_punct("+") => Some(UnaryOp::Plus),
            Some(t) if t.is_ident("typeof") => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> EvalResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") || self.peek_punct("?.") {
                let optional = self.eat_punct("?.");
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> EvalResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.expression()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        let Some(tok) = self.peek() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;

        match tok.kind {
            TokenKind::Number => parse_number(tok.text)
                .map(|n| Expr::Literal(number(n)))
                .ok_or_else(|| EvalError::Syntax {
                    offset: tok.start,
                    message: format!("invalid number `{}`", tok.text),
                }),
            TokenKind::Str => try_parse_string_literal(tok.text)
                .map(|s| Expr::Literal(Value::String(s)))
                .ok_or_else(|| EvalError::Syntax {
                    offset: tok.start,
                    message: "unterminated string".to_string(),
                }),
            TokenKind::Template => parse_template(tok.text, tok.start),
            TokenKind::Ident => Ok(match tok.text {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                "this" | "self" => Expr::This,
                name => Expr::Ident(name.to_string()),
            }),
            TokenKind::Punct => match tok.text {
                "(" => {
                    let inner = self.expression()?;
                    self.expect_punct(")")?;
                    Ok(inner)
                }
                "[" => self.array_literal(),
                "{" => self.object_literal(),
                other => Err(EvalError::Syntax {
                    offset: tok.start,
                    message: format!("unexpected `{}`", other),
                }),
            },
            TokenKind::Regex => Err(EvalError::Type("regular expressions are not supported".to_string())),
            _ => Err(self.error("unexpected token")),
        }
    }

    fn array_literal(&mut self) -> EvalResult<Expr> {
        let mut items = Vec::new();
        while !self.eat_punct("]") {
            if self.eat_punct("...") {
                items.push(ArrayItem::Spread(self.expression()?));
            } else {
                items.push(ArrayItem::Item(self.expression()?));
            }
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                break;
            }
        }
        Ok(Expr::Array(items))
    }

    fn object_literal(&mut self) -> EvalResult<Expr> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                entries.push(ObjectEntry::Spread(self.expression()?));
            } else {
                let Some(key_tok) = self.peek() else {
                    return Err(self.error("unterminated object literal"));
                };
                self.pos += 1;
                let key = match key_tok.kind {
                    TokenKind::Ident | TokenKind::Number => key_tok.text.to_string(),
                    TokenKind::Str => try_parse_string_literal(key_tok.text)
                        .ok_or_else(|| self.error("invalid object key"))?,
                    _ => return Err(self.error("invalid object key")),
                };
                let value = if self.eat_punct(":") {
                    self.expression()?
                } else {
                    Expr::Ident(key.clone())
                };
                entries.push(ObjectEntry::Property(key, value));
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

fn to_target(expr: Expr) -> EvalResult<AssignTarget> {
    match expr {
        Expr::Ident(name) => Ok(AssignTarget::Local(name)),
        Expr::Member {
            object, property, ..
        } => match *object {
            Expr::This => Ok(AssignTarget::Field(property)),
            other => Ok(AssignTarget::Member(Box::new(other), property)),
        },
        other => Err(EvalError::NotAssignable(format!("{:?}", other))),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned = text.replace('_', "");
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    cleaned.parse::<f64>().ok()
}

/// `'...'` / `"..."` with escapes resolved.
fn try_parse_string_literal(s: &str) -> Option<String> {
    let quote = s.chars().next()?;
    if s.len() < 2 || !s.ends_with(quote) || (quote != '"' && quote != '\'') {
        return None;
    }
    Some(unescape_string(&s[1..s.len() - 1]))
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('0') => result.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => result.push(ch),
                    None => {
                        result.push_str("\\u");
                        result.push_str(&hex);
                    }
                }
            }
            Some('\n') => {}
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}

fn parse_template(text: &str, base: usize) -> EvalResult<Expr> {
    let inner = text
        .strip_prefix('`')
        .and_then(|t| t.strip_suffix('`'))
        .ok_or(EvalError::Syntax {
            offset: base,
            message: "unterminated template literal".to_string(),
        })?;

    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let bytes = inner.as_bytes();

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let escape_end = inner[i + 1..]
                .chars()
                .next()
                .map_or(i + 1, |c| i + 1 + c.len_utf8());
            literal.push_str(&unescape_string(&inner[i..escape_end]));
            i = escape_end;
        } else if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            let rest = &inner[i + 2..];
            let mut depth = 0;
            let mut close = None;
            for tok in tokenize(rest) {
                if tok.is_punct("{") {
                    depth += 1;
                } else if tok.is_punct("}") {
                    if depth == 0 {
                        close = Some(tok.start);
                        break;
                    }
                    depth -= 1;
                }
            }
            let close = close.ok_or(EvalError::Syntax {
                offset: base + i,
                message: "unterminated template substitution".to_string(),
            })?;
            if !literal.is_empty() {
                parts.push(TemplatePart::Text(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Expr(parse_expression(&rest[..close])?));
            i += 2 + close + 1;
        } else {
            let ch_len = inner[i..].chars().next().map_or(1, char::len_utf8);
            literal.push_str(&inner[i..i + ch_len]);
            i += ch_len;
        }
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Text(literal));
    }
    Ok(Expr::Template(parts))
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE SEMANTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Whole numbers stay integers so they print without a fraction.
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn number_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// `String(value)`
pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => number_string(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| if v.is_null() { String::new() } else { to_js_string(v) })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Rendering of an interpolated value: null renders nothing, arrays are joined
/// without a separator, objects are JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(format_value).collect(),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
        other => to_js_string(other),
    }
}

pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> bool {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return match op {
            BinaryOp::Lt => x < y,
            BinaryOp::Gt => x > y,
            BinaryOp::LtEq => x <= y,
            _ => x >= y,
        };
    }
    let (x, y) = (to_number(a), to_number(b));
    match op {
        BinaryOp::Lt => x < y,
        BinaryOp::Gt => x > y,
        BinaryOp::LtEq => x <= y,
        _ => x >= y,
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Value {
    if op == BinaryOp::Add && (a.is_string() || b.is_string() || a.is_array() || b.is_array()) {
        return Value::String(to_js_string(a) + &to_js_string(b));
    }
    let (x, y) = (to_number(a), to_number(b));
    number(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => x % y,
    })
}

fn get_property(value: &Value, property: &str, optional: bool) -> EvalResult<Value> {
    match value {
        Value::Null if optional => Ok(Value::Null),
        Value::Null => Err(EvalError::Type(format!(
            "cannot read property `{}` of null",
            property
        ))),
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        _ => Ok(Value::Null),
    }
}

fn get_index(value: &Value, index: &Value) -> EvalResult<Value> {
    match (value, index) {
        (Value::Array(items), Value::Number(_)) => {
            let i = to_number(index);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::String(s), Value::Number(_)) => {
            let i = to_number(index);
            if i < 0.0 || i.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(s.chars()
                .nth(i as usize)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), key) => Ok(map.get(&to_js_string(key)).cloned().unwrap_or(Value::Null)),
        (Value::Array(_), key) => get_property(value, &to_js_string(key), false),
        (Value::Null, _) => Err(EvalError::Type("cannot index null".to_string())),
        _ => Ok(Value::Null),
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Null)
}

/// Resolve a possibly negative slice bound against `len`.
fn slice_bound(value: &Value, len: usize, default: usize) -> usize {
    if value.is_null() {
        return default;
    }
    let n = to_number(value);
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn value_method(value: &Value, method: &str, args: &[Value]) -> EvalResult<Value> {
    match (value, method) {
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "includes") => Ok(Value::Bool(s.contains(&to_js_string(&arg(args, 0))))),
        (Value::String(s), "indexOf") => {
            let needle = to_js_string(&arg(args, 0));
            Ok(match s.find(&needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::from(-1),
            })
        }
        (Value::String(s), "slice") => {
            let chars: Vec<char> = s.chars().collect();
            let start = slice_bound(&arg(args, 0), chars.len(), 0);
            let end = slice_bound(&arg(args, 1), chars.len(), chars.len());
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        (Value::Array(items), "join") => {
            let sep = match args.first() {
                Some(Value::Null) | None => ",".to_string(),
                Some(v) => to_js_string(v),
            };
            Ok(Value::String(
                items
                    .iter()
                    .map(|v| if v.is_null() { String::new() } else { to_js_string(v) })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        (Value::Array(items), "includes") => {
            let needle = arg(args, 0);
            Ok(Value::Bool(items.iter().any(|v| strict_equals(v, &needle))))
        }
        (Value::Array(items), "indexOf") => {
            let needle = arg(args, 0);
            Ok(match items.iter().position(|v| strict_equals(v, &needle)) {
                Some(i) => Value::from(i),
                None => Value::from(-1),
            })
        }
        (Value::Array(items), "slice") => {
            let start = slice_bound(&arg(args, 0), items.len(), 0);
            let end = slice_bound(&arg(args, 1), items.len(), items.len());
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        (Value::Number(n), "toFixed") => {
            let digits = to_number(&arg(args, 0)).max(0.0).min(100.0) as usize;
            Ok(Value::String(format!("{:.*}", digits, n.as_f64().unwrap_or(f64::NAN))))
        }
        (Value::Null, _) => Err(EvalError::Type(format!(
            "cannot call `{}` on null",
            method
        ))),
        (_, "toString") => Ok(Value::String(to_js_string(value))),
        _ => Err(EvalError::UnknownMethod(format!(
            "{}.{}",
            type_of(value),
            method
        ))),
    }
}

fn math_function(name: &str, args: &[Value]) -> EvalResult<Value> {
    let x = to_number(&arg(args, 0));
    let result = match name {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "abs" => x.abs(),
        "trunc" => x.trunc(),
        "sqrt" => x.sqrt(),
        "sign" => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        "pow" => x.powf(to_number(&arg(args, 1))),
        "min" => args.iter().map(to_number).fold(f64::INFINITY, f64::min),
        "max" => args.iter().map(to_number).fold(f64::NEG_INFINITY, f64::max),
        other => return Err(EvalError::UnknownFunction(format!("Math.{}", other))),
    };
    Ok(number(result))
}

fn math_constant(name: &str) -> EvalResult<Value> {
    match name {
        "PI" => Ok(number(std::f64::consts::PI)),
        "E" => Ok(number(std::f64::consts::E)),
        other => Err(EvalError::UnknownIdentifier(format!("Math.{}", other))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════════════════════════════════════════

/// Store and action handles are not plain values, so locals hold operands.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Value(Value),
    Store(String),
    Actions(String),
}

enum Flow {
    Next,
    Return(Value),
}

struct Interpreter<'a> {
    scope: &'a dyn EvalScope,
    locals: HashMap<String, Operand>,
}

impl<'a> Interpreter<'a> {
    fn new(scope: &'a dyn EvalScope) -> Self {
        Self {
            scope,
            locals: HashMap::new(),
        }
    }

    fn value(&mut self, expr: &Expr) -> EvalResult<Value> {
        let operand = self.eval(expr)?;
        self.materialize(operand)
    }

    fn materialize(&self, operand: Operand) -> EvalResult<Value> {
        match operand {
            Operand::Value(v) => Ok(v),
            Operand::Store(name) => self.scope.store_snapshot(&name),
            Operand::Actions(name) => Err(EvalError::Type(format!(
                "actions `{}` cannot be used as a value",
                name
            ))),
        }
    }

    fn is_global(&self, name: &str, global: &str) -> bool {
        name == global && !self.locals.contains_key(name)
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Operand> {
        let value = match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Expr(e) => out.push_str(&to_js_string(&self.value(e)?)),
                    }
                }
                Value::String(out)
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ArrayItem::Item(e) => out.push(self.value(e)?),
                        ArrayItem::Spread(e) => match self.value(e)? {
                            Value::Array(inner) => out.extend(inner),
                            Value::Null => {}
                            other => {
                                return Err(EvalError::Type(format!(
                                    "cannot spread {}",
                                    type_of(&other)
                                )))
                            }
                        },
                    }
                }
                Value::Array(out)
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    match entry {
                        ObjectEntry::Property(key, e) => {
                            let v = self.value(e)?;
                            map.insert(key.clone(), v);
                        }
                        ObjectEntry::Spread(e) => {
                            if let Value::Object(inner) = self.value(e)? {
                                map.extend(inner);
                            }
                        }
                    }
                }
                Value::Object(map)
            }
            Expr::This => {
                return Err(EvalError::Type("`this` cannot be used as a value".to_string()))
            }
            Expr::Ident(name) => {
                if let Some(local) = self.locals.get(name) {
                    return Ok(local.clone());
                }
                self.scope
                    .identifier(name)
                    .ok_or_else(|| EvalError::UnknownIdentifier(name.clone()))?
            }
            Expr::Member {
                object,
                property,
                optional,
            } => match object.as_ref() {
                Expr::This => self.scope.field(property).unwrap_or(Value::Null),
                Expr::Ident(ns) if self.is_global(ns, "Math") => math_constant(property)?,
                _ => match self.eval(object)? {
                    Operand::Store(name) => self.scope.read_store(&name, property)?,
                    Operand::Actions(name) => {
                        return Err(EvalError::Type(format!(
                            "action `{}.{}` must be called",
                            name, property
                        )))
                    }
                    Operand::Value(v) => get_property(&v, property, *optional)?,
                },
            },
            Expr::Index(object, index) => {
                let target = self.value(object)?;
                let index = self.value(index)?;
                get_index(&target, &index)?
            }
            Expr::Call(callee, args) => return self.call(callee, args),
            Expr::Unary(op, operand) => {
                let v = self.value(operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!truthy(&v)),
                    UnaryOp::Neg => number(-to_number(&v)),
                    UnaryOp::Plus => number(to_number(&v)),
                    UnaryOp::TypeOf => Value::String(type_of(&v).to_string()),
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.value(left)?;
                match op {
                    BinaryOp::And => {
                        if truthy(&l) {
                            self.value(right)?
                        } else {
                            l
                        }
                    }
                    BinaryOp::Or => {
                        if truthy(&l) {
                            l
                        } else {
                            self.value(right)?
                        }
                    }
                    BinaryOp::Nullish => {
                        if l.is_null() {
                            self.value(right)?
                        } else {
                            l
                        }
                    }
                    BinaryOp::Eq => Value::Bool(strict_equals(&l, &self.value(right)?)),
                    BinaryOp::NotEq => Value::Bool(!strict_equals(&l, &self.value(right)?)),
                    BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
                        Value::Bool(compare(*op, &l, &self.value(right)?))
                    }
                    _ => arithmetic(*op, &l, &self.value(right)?),
                }
            }
            Expr::Conditional(condition, consequent, alternate) => {
                let branch = if truthy(&self.value(condition)?) {
                    consequent
                } else {
                    alternate
                };
                return self.eval(branch);
            }
        };
        Ok(Operand::Value(value))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Operand> {
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.value(a)?);
        }

        let result = match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => match object.as_ref() {
                Expr::This => self.scope.call_method(property, values)?,
                Expr::Ident(ns) if self.is_global(ns, "Math") => math_function(property, &values)?,
                Expr::Ident(ns) if self.is_global(ns, "JSON") && property == "stringify" => {
                    Value::String(serde_json::to_string(&arg(&values, 0)).unwrap_or_default())
                }
                Expr::Ident(ns) if self.is_global(ns, "console") => {
                    let line = values.iter().map(format_value).collect::<Vec<_>>().join(" ");
                    match property.as_str() {
                        "error" => tracing::error!(target: "glint::console", "{}", line),
                        "warn" => tracing::warn!(target: "glint::console", "{}", line),
                        "debug" => tracing::debug!(target: "glint::console", "{}", line),
                        _ => tracing::info!(target: "glint::console", "{}", line),
                    }
                    Value::Null
                }
                _ => match self.eval(object)? {
                    Operand::Actions(group) => self.scope.call_action(&group, property, values)?,
                    Operand::Store(name) => {
                        return Err(EvalError::Type(format!(
                            "store `{}` has no method `{}`",
                            name, property
                        )))
                    }
                    Operand::Value(Value::Null) if *optional => Value::Null,
                    Operand::Value(v) => value_method(&v, property, &values)?,
                },
            },
            Expr::Ident(name) if !self.locals.contains_key(name) => {
                match name.as_str() {
                    "getState" => {
                        let store = to_js_string(&arg(&values, 0));
                        if !self.scope.has_store(&store) {
                            return Err(EvalError::UnknownStore(store));
                        }
                        return Ok(Operand::Store(store));
                    }
                    "getActions" => {
                        let group = to_js_string(&arg(&values, 0));
                        if !self.scope.has_actions(&group) {
                            return Err(EvalError::UnknownAction {
                                group,
                                action: String::new(),
                            });
                        }
                        return Ok(Operand::Actions(group));
                    }
                    "String" => Value::String(match values.first() {
                        Some(v) => to_js_string(v),
                        None => String::new(),
                    }),
                    "Number" => number(to_number(&arg(&values, 0))),
                    "Boolean" => Value::Bool(truthy(&arg(&values, 0))),
                    _ => self.scope.call_method(name, values)?,
                }
            }
            other => {
                return Err(EvalError::Type(format!("{:?} is not callable", other)));
            }
        };
        Ok(Operand::Value(result))
    }

    fn current(&mut self, target: &AssignTarget) -> EvalResult<Value> {
        match target {
            AssignTarget::Field(name) => Ok(self.scope.field(name).unwrap_or(Value::Null)),
            AssignTarget::Local(name) => match self.locals.get(name).cloned() {
                Some(op) => self.materialize(op),
                None => Err(EvalError::UnknownIdentifier(name.clone())),
            },
            AssignTarget::Member(object, prop) => match self.eval(object)? {
                Operand::Store(store) => self.scope.read_store(&store, prop),
                Operand::Value(v) => get_property(&v, prop, false),
                Operand::Actions(group) => Err(EvalError::NotAssignable(format!("{}.{}", group, prop))),
            },
        }
    }

    fn assign(&mut self, target: &AssignTarget, value: Value) -> EvalResult<()> {
        match target {
            AssignTarget::Field(name) => self.scope.set_field(name, value),
            AssignTarget::Local(name) => {
                if !self.locals.contains_key(name) {
                    return Err(EvalError::NotAssignable(name.clone()));
                }
                self.locals.insert(name.clone(), Operand::Value(value));
                Ok(())
            }
            AssignTarget::Member(object, prop) => match self.eval(object)? {
                Operand::Store(store) => self.scope.write_store(&store, prop, value),
                _ => Err(EvalError::NotAssignable(format!("{:?}.{}", object, prop))),
            },
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.value(value)?;
                let new_value = match op {
                    AssignOp::Set => rhs,
                    other => {
                        let current = self.current(target)?;
                        let bin = match other {
                            AssignOp::Add => BinaryOp::Add,
                            AssignOp::Sub => BinaryOp::Sub,
                            AssignOp::Mul => BinaryOp::Mul,
                            AssignOp::Div => BinaryOp::Div,
                            _ => BinaryOp::Rem,
                        };
                        arithmetic(bin, &current, &rhs)
                    }
                };
                self.assign(target, new_value)?;
            }
            Stmt::Update { target, delta } => {
                let current = to_number(&self.current(target)?);
                self.assign(target, number(current + delta))?;
            }
            Stmt::Let { name, value } => {
                let operand = match value {
                    Some(e) => self.eval(e)?,
                    None => Operand::Value(Value::Null),
                };
                self.locals.insert(name.clone(), operand);
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if truthy(&self.value(condition)?) {
                    then
                } else {
                    otherwise
                };
                return self.exec_block(branch);
            }
            Stmt::Block(stmts) => return self.exec_block(stmts),
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.value(e)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }
}

pub fn evaluate(expr: &Expr, scope: &dyn EvalScope) -> EvalResult<Value> {
    Interpreter::new(scope).value(expr)
}

pub fn eval_str(src: &str, scope: &dyn EvalScope) -> EvalResult<Value> {
    evaluate(&parse_expression(src)?, scope)
}

/// Run statements, returning the value of a `return` if one executed.
pub fn execute(stmts: &[Stmt], scope: &dyn EvalScope) -> EvalResult<Option<Value>> {
    match Interpreter::new(scope).exec_block(stmts)? {
        Flow::Return(v) => Ok(Some(v)),
        Flow::Next => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILED SCRIPTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMethod {
    pub name: String,
    pub params: Vec<(String, Option<Expr>)>,
    pub body: Vec<Stmt>,
}

impl CompiledMethod {
    pub fn compile(method: &MethodSource) -> EvalResult<Self> {
        let mut params = Vec::with_capacity(method.params.len());
        for raw in &method.params {
            let (name, default) = match raw.split_once('=') {
                Some((name, default)) => (name.trim(), Some(parse_expression(default.trim())?)),
                None => (raw.trim(), None),
            };
            if !is_valid_identifier(name) {
                return Err(EvalError::Syntax {
                    offset: 0,
                    message: format!("unsupported parameter `{}`", raw),
                });
            }
            params.push((name.to_string(), default));
        }
        Ok(Self {
            name: method.name.clone(),
            params,
            body: parse_statements(&method.body)?,
        })
    }

    pub fn call(&self, args: Vec<Value>, scope: &dyn EvalScope) -> EvalResult<Value> {
        let mut interp = Interpreter::new(scope);
        let mut args = args.into_iter();
        for (name, default) in &self.params {
            let value = match (args.next(), default) {
                (Some(v), _) if !v.is_null() => v,
                (_, Some(d)) => interp.value(d)?,
                (v, None) => v.unwrap_or(Value::Null),
            };
            interp.locals.insert(name.clone(), Operand::Value(value));
        }
        match interp.exec_block(&self.body)? {
            Flow::Return(v) => Ok(v),
            Flow::Next => Ok(Value::Null),
        }
    }
}

/// Initializer statements and methods of one component, compiled once per
/// definition. Anything that fails to compile is logged and left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledScript {
    pub init: Vec<Stmt>,
    pub methods: HashMap<String, CompiledMethod>,
}

impl CompiledScript {
    pub fn compile(component: &str, init: &[String], methods: &[MethodSource]) -> Self {
        let mut script = CompiledScript::default();

        for statement in init {
            match parse_statements(statement) {
                Ok(stmts) => script.init.extend(stmts),
                Err(e) => tracing::warn!(
                    component,
                    statement = %statement,
                    error = %e,
                    "initializer not supported by the sandbox; skipped"
                ),
            }
        }

        for method in methods {
            match CompiledMethod::compile(method) {
                Ok(compiled) => {
                    script.methods.insert(method.name.clone(), compiled);
                }
                Err(e) => tracing::warn!(
                    component,
                    method = %method.name,
                    error = %e,
                    "method not supported by the sandbox; left unresolved"
                ),
            }
        }

        script
    }
}

pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap();
}

/// Undo the entity escaping an HTML round trip applies to expression text.
pub fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inline marker left in place of an expression that failed.
pub fn error_placeholder(expr: &str) -> String {
    format!(
        "<span style=\"color: red; font-weight: bold;\">[Expression Error: {}]</span>",
        escape_html(expr)
    )
}

/// Replace every `{{ expr }}` in `template`. A failing expression is logged and
/// replaced by [`error_placeholder`]; the rest of the template still renders.
pub fn interpolate(template: &str, scope: &dyn EvalScope) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let raw = caps[1].trim();
            let expr = decode_entities(raw);
            match eval_str(&expr, scope) {
                Ok(value) => format_value(&value),
                Err(e) => {
                    tracing::error!(expression = %expr, error = %e, "interpolation failed");
                    error_placeholder(&expr)
                }
            }
        })
        .into_owned()
}
