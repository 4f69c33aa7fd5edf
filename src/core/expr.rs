// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression parsing and evaluation.
//!
//! Operand literals and directive arguments are plain text. This module
//! parses that text into a small [`Expr`] tree and evaluates it against an
//! [`EvalContext`]. Evaluation always reports the names an expression
//! references, even when it fails, so that relocation tracking and local
//! label qualification can work on expressions that are not yet resolvable.

use crate::core::text_utils::{is_name_char, is_name_start};

/// Error returned from expression parsing or evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

/// Context for expression evaluation.
///
/// This trait provides what is needed to resolve symbols, the current
/// address (`$`) and relative labels (`$+`, `$-`).
pub trait EvalContext {
    /// Look up a symbol's value by name.
    fn lookup_symbol(&self, name: &str) -> Option<i64>;

    /// Get the current address (`$`).
    fn current_address(&self) -> Option<i64>;

    /// Address of the nearest relative label after (`forward`) or before
    /// the current line.
    fn relative_label(&self, _forward: bool) -> Option<i64> {
        None
    }
}

/// Result of evaluating one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: Result<u16, EvalError>,
    pub references: Vec<String>,
}

impl Evaluation {
    pub fn is_ok(&self) -> bool {
        self.value.is_ok()
    }

    pub fn refers_to(&self, name: &str) -> bool {
        self.references.iter().any(|r| r == name)
    }
}

/// Pluggable expression evaluator.
pub trait ExpressionEvaluator {
    /// Evaluate `text` to a 16-bit value plus the names it references.
    fn evaluate(&self, text: &str, ctx: &dyn EvalContext) -> Evaluation;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    LogicNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicAnd,
    LogicOr,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::LogicOr => 1,
            BinaryOp::LogicAnd => 2,
            BinaryOp::BitOr => 3,
            BinaryOp::BitXor => 4,
            BinaryOp::BitAnd => 5,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 7,
            BinaryOp::Shl | BinaryOp::Shr => 8,
            BinaryOp::Add | BinaryOp::Subtract => 9,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Mod => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i64),
    Identifier(String),
    Dollar,
    RelativeLabel { forward: bool },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Collect every identifier in the tree, in source order.
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Identifier(name) => {
                if !out.iter().any(|existing| existing == name) {
                    out.push(name.clone());
                }
            }
            Expr::Unary { expr, .. } => expr.collect_references(out),
            Expr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expr::Number(_) | Expr::Dollar | Expr::RelativeLabel { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Identifier(String),
    Dollar,
    RelativeLabel(bool),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 20] = [
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "!", "<", ">",
];

fn tokenize(text: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b' ' || c == b'\t' {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let literal = &text[start..i];
            let value = parse_number(literal)
                .ok_or_else(|| EvalError::new(format!("Invalid number: {literal}")))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if is_name_start(c) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_name_char(bytes[i]) {
                i += 1;
            }
            tokens.push(Token::Identifier(text[start..i].to_string()));
            continue;
        }
        if c == b'\'' {
            let (value, len) = parse_char_literal(&text[i..])?;
            tokens.push(Token::Number(value));
            i += len;
            continue;
        }
        if c == b'$' {
            // `$+` / `$-` name a relative label unless an operand follows.
            if let Some(&sign) = bytes.get(i + 1) {
                if sign == b'+' || sign == b'-' {
                    let rest = text[i + 2..].trim_start();
                    if !rest.bytes().next().is_some_and(starts_operand) {
                        tokens.push(Token::RelativeLabel(sign == b'+'));
                        i += 2;
                        continue;
                    }
                }
            }
            tokens.push(Token::Dollar);
            i += 1;
            continue;
        }
        if c == b'(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == b')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        match OPERATORS.iter().find(|op| text[i..].starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
            None => {
                let ch = text[i..].chars().next().unwrap_or('?');
                return Err(EvalError::new(format!("Unexpected character: {ch}")));
            }
        }
    }
    Ok(tokens)
}

fn starts_operand(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'(' | b'$' | b'\'' | b'~' | b'!' | b'-' | b'+')
}

fn parse_char_literal(text: &str) -> Result<(i64, usize), EvalError> {
    let mut chars = text.char_indices().skip(1);
    let (value, mut end) = match chars.next() {
        Some((_, '\\')) => match chars.next() {
            Some((idx, esc)) => {
                let value = match esc {
                    'n' => '\n' as i64,
                    'r' => '\r' as i64,
                    't' => '\t' as i64,
                    '0' => 0,
                    other => other as i64,
                };
                (value, idx + esc.len_utf8())
            }
            None => return Err(EvalError::new("Unterminated character literal")),
        },
        Some((idx, ch)) if ch != '\'' => (ch as i64, idx + ch.len_utf8()),
        _ => return Err(EvalError::new("Empty character literal")),
    };
    match text[end..].chars().next() {
        Some('\'') => end += 1,
        _ => return Err(EvalError::new("Unterminated character literal")),
    }
    Ok((value, end))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => match binary_op(op) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.parse_binary(prec + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Op(op)) => {
                let op = match op {
                    "+" => UnaryOp::Plus,
                    "-" => UnaryOp::Minus,
                    "~" => UnaryOp::BitNot,
                    "!" => UnaryOp::LogicNot,
                    other => return Err(EvalError::new(format!("Unexpected operator: {other}"))),
                };
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(expr),
                })
            }
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Identifier(name)) => Ok(Expr::Identifier(name)),
            Some(Token::Dollar) => Ok(Expr::Dollar),
            Some(Token::RelativeLabel(forward)) => Ok(Expr::RelativeLabel { forward }),
            Some(Token::LParen) => {
                let inner = self.parse_binary(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EvalError::new("Missing closing parenthesis")),
                }
            }
            Some(Token::RParen) => Err(EvalError::new("Unexpected closing parenthesis")),
            None => Err(EvalError::new("Unexpected end of expression")),
        }
    }
}

fn binary_op(op: &str) -> Option<BinaryOp> {
    Some(match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Subtract,
        "*" => BinaryOp::Multiply,
        "/" => BinaryOp::Divide,
        "%" => BinaryOp::Mod,
        "&" => BinaryOp::BitAnd,
        "|" => BinaryOp::BitOr,
        "^" => BinaryOp::BitXor,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "&&" => BinaryOp::LogicAnd,
        "||" => BinaryOp::LogicOr,
        _ => return None,
    })
}

/// Parse expression text into an [`Expr`] tree.
pub fn parse_expr(text: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(EvalError::new("Empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_binary(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(EvalError::new(format!("Unexpected trailing input in: {text}")));
    }
    Ok(expr)
}

/// Evaluate an expression to a numeric value.
pub fn eval_expr(expr: &Expr, ctx: &dyn EvalContext) -> Result<i64, EvalError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Identifier(name) => ctx
            .lookup_symbol(name)
            .ok_or_else(|| EvalError::new(format!("Undefined symbol: {name}"))),
        Expr::Dollar => ctx
            .current_address()
            .ok_or_else(|| EvalError::new("Current address ($) not available")),
        Expr::RelativeLabel { forward } => ctx.relative_label(*forward).ok_or_else(|| {
            EvalError::new(if *forward {
                "No following relative label"
            } else {
                "No preceding relative label"
            })
        }),
        Expr::Unary { op, expr } => {
            let val = eval_expr(expr, ctx)?;
            Ok(apply_unary(*op, val))
        }
        Expr::Binary { op, left, right } => {
            let l = eval_expr(left, ctx)?;
            let r = eval_expr(right, ctx)?;
            apply_binary(*op, l, r)
        }
    }
}

/// Apply a unary operator to a value.
pub fn apply_unary(op: UnaryOp, val: i64) -> i64 {
    match op {
        UnaryOp::Plus => val,
        UnaryOp::Minus => val.wrapping_neg(),
        UnaryOp::BitNot => !val,
        UnaryOp::LogicNot => (val == 0) as i64,
    }
}

/// Apply a binary operator to two values.
pub fn apply_binary(op: BinaryOp, l: i64, r: i64) -> Result<i64, EvalError> {
    Ok(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Subtract => l.wrapping_sub(r),
        BinaryOp::Multiply => l.wrapping_mul(r),
        BinaryOp::Divide => {
            if r == 0 {
                return Err(EvalError::new("Division by zero"));
            }
            l.wrapping_div(r)
        }
        BinaryOp::Mod => {
            if r == 0 {
                return Err(EvalError::new("Modulo by zero"));
            }
            l.wrapping_rem(r)
        }
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        // Shift amounts are masked to the 16-bit word width.
        BinaryOp::Shl => l.wrapping_shl((r & 0x1f) as u32),
        BinaryOp::Shr => (((l as u64) & 0xffff).wrapping_shr((r & 0x1f) as u32)) as i64,
        BinaryOp::Eq => (l == r) as i64,
        BinaryOp::Ne => (l != r) as i64,
        BinaryOp::Lt => (l < r) as i64,
        BinaryOp::Le => (l <= r) as i64,
        BinaryOp::Gt => (l > r) as i64,
        BinaryOp::Ge => (l >= r) as i64,
        BinaryOp::LogicAnd => ((l != 0) && (r != 0)) as i64,
        BinaryOp::LogicOr => ((l != 0) || (r != 0)) as i64,
    })
}

/// Parse a number literal (decimal, hex, binary, octal).
///
/// Supports:
/// - Decimal: `42`
/// - Hex: `0x2A`, `2Ah`
/// - Binary: `0b101010`, `101010b`
/// - Octal: `0o52`, `52o`, `52q`
///
/// `$` is the current address and `%` is the modulo operator in this
/// syntax, so neither is accepted as a number prefix.
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (is_neg, text) = if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else {
        (false, text)
    };

    let text: String = text.chars().filter(|&c| c != '_').collect();
    let text = text.as_str();
    if !text.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let val = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()?
    } else if text.ends_with('h') || text.ends_with('H') {
        i64::from_str_radix(&text[..text.len() - 1], 16).ok()?
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        if !bin.is_empty() && bin.chars().all(|c| c == '0' || c == '1') {
            i64::from_str_radix(bin, 2).ok()?
        } else {
            return None;
        }
    } else if text.ends_with('b') || text.ends_with('B') {
        let inner = &text[..text.len() - 1];
        if inner.chars().all(|c| c == '0' || c == '1') {
            i64::from_str_radix(inner, 2).ok()?
        } else {
            return None;
        }
    } else if text.ends_with('o')
        || text.ends_with('O')
        || text.ends_with('q')
        || text.ends_with('Q')
    {
        i64::from_str_radix(&text[..text.len() - 1], 8).ok()?
    } else if text.ends_with('d') || text.ends_with('D') {
        text[..text.len() - 1].parse::<i64>().ok()?
    } else {
        text.parse::<i64>().ok()?
    };

    Some(if is_neg { -val } else { val })
}

/// Default evaluator: C-like precedence, values truncated to 16 bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEvaluator;

impl ExpressionEvaluator for StandardEvaluator {
    fn evaluate(&self, text: &str, ctx: &dyn EvalContext) -> Evaluation {
        match parse_expr(text) {
            Ok(expr) => {
                let mut references = Vec::new();
                expr.collect_references(&mut references);
                let value = eval_expr(&expr, ctx).map(|v| v as u16);
                Evaluation { value, references }
            }
            Err(err) => Evaluation {
                value: Err(err),
                references: Vec::new(),
            },
        }
    }
}

/// Simple evaluation context that wraps a symbol lookup function.
pub struct SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    lookup: F,
    addr: Option<i64>,
}

impl<F> SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup, addr: None }
    }

    pub fn with_address(lookup: F, addr: i64) -> Self {
        Self {
            lookup,
            addr: Some(addr),
        }
    }
}

impl<F> EvalContext for SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    fn lookup_symbol(&self, name: &str) -> Option<i64> {
        (self.lookup)(name)
    }

    fn current_address(&self) -> Option<i64> {
        self.addr
    }
}
