// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Opcode and operand pattern tables.
//!
//! Every table entry is a pattern in a small matching language plus the
//! byte it encodes to. Patterns are compiled to token lists when the table
//! is loaded and matched in table order; the first entry that consumes the
//! whole input wins.
//!
//! Pattern tokens:
//! - `_` one or more blanks required
//! - `.` blanks optional
//! - `%a` / `%b` operand sub-field, matched separately against the value table
//! - `$x` literal expression
//! - `&x` literal expression, captured as `-( ... )`
//! - anything else matches one character, case-insensitively
//!
//! Captures run up to the next top-level occurrence of the literal character
//! that follows them in the pattern, or to the end of the input when no
//! literal follows.

use std::fmt;
use std::path::Path;

use crate::core::statement::OperandDescriptor;
use crate::core::text_utils::{find_top_level, is_space};

/// The built-in DCPU-16 (1.7) table.
pub const DCPU16_TABLE: &str = include_str!("../../assets/dcpu16.table");

/// Selector of the bare `[next word]` literal mode.
pub const SELECTOR_NEXT_WORD: u8 = 0x1f;
/// Selector of the `[[next word]]` memory mode.
pub const SELECTOR_NEXT_WORD_INDIRECT: u8 = 0x1e;

/// Error raised while loading a pattern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableError {
    pub line: Option<usize>,
    pub message: String,
}

impl TableError {
    pub fn new(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "table line {line}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TableError {}

/// Operand slot a sub-field capture fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSlot {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternToken {
    Char(u8),
    RequiredSpace,
    OptionalSpace,
    SubField(OperandSlot),
    Literal { negative: bool },
}

/// One compiled table entry.
#[derive(Debug, Clone)]
pub struct Pattern {
    text: String,
    value: u8,
    tokens: Vec<PatternToken>,
}

impl Pattern {
    pub fn compile(text: &str, value: u8) -> Result<Self, String> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::with_capacity(bytes.len());
        let mut i = 0usize;
        while i < bytes.len() {
            let c = bytes[i];
            let token = match c {
                b'_' => PatternToken::RequiredSpace,
                b'.' => PatternToken::OptionalSpace,
                b'%' | b'$' | b'&' => {
                    i += 1;
                    let Some(&id) = bytes.get(i) else {
                        return Err(format!("capture without a name in `{text}`"));
                    };
                    match c {
                        b'%' => match id.to_ascii_lowercase() {
                            b'a' => PatternToken::SubField(OperandSlot::A),
                            b'b' => PatternToken::SubField(OperandSlot::B),
                            _ => return Err(format!("unknown sub-field `%{}`", id as char)),
                        },
                        _ => PatternToken::Literal {
                            negative: c == b'&',
                        },
                    }
                }
                _ => PatternToken::Char(c.to_ascii_uppercase()),
            };
            tokens.push(token);
            i += 1;
        }
        if tokens.is_empty() {
            return Err("empty pattern".to_string());
        }
        Ok(Self {
            text: text.to_string(),
            value,
            tokens,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Match the whole of `input` against this pattern.
    pub fn match_text(&self, input: &str) -> Option<PatternMatch<'_>> {
        let bytes = input.as_bytes();
        let mut pos = 0usize;
        let mut found = PatternMatch {
            pattern: &self.text,
            value: self.value,
            field_a: None,
            field_b: None,
            literal: None,
        };
        for (idx, token) in self.tokens.iter().enumerate() {
            match *token {
                PatternToken::Char(c) => {
                    if pos >= bytes.len() || bytes[pos].to_ascii_uppercase() != c {
                        return None;
                    }
                    pos += 1;
                }
                PatternToken::RequiredSpace => {
                    let start = pos;
                    while pos < bytes.len() && is_space(bytes[pos]) {
                        pos += 1;
                    }
                    if pos == start {
                        return None;
                    }
                }
                PatternToken::OptionalSpace => {
                    while pos < bytes.len() && is_space(bytes[pos]) {
                        pos += 1;
                    }
                }
                PatternToken::SubField(slot) => {
                    let end = self.capture_end(idx, input, pos)?;
                    let captured = input[pos..end].trim();
                    if captured.is_empty() {
                        return None;
                    }
                    match slot {
                        OperandSlot::A => found.field_a = Some(captured.to_string()),
                        OperandSlot::B => found.field_b = Some(captured.to_string()),
                    }
                    pos = end;
                }
                PatternToken::Literal { negative } => {
                    let end = self.capture_end(idx, input, pos)?;
                    let captured = input[pos..end].trim();
                    if captured.is_empty() {
                        return None;
                    }
                    found.literal = Some(if negative {
                        format!("-({captured})")
                    } else {
                        captured.to_string()
                    });
                    pos = end;
                }
            }
        }
        (pos == bytes.len()).then_some(found)
    }

    fn capture_end(&self, idx: usize, input: &str, from: usize) -> Option<usize> {
        let delimiter = self.tokens[idx + 1..].iter().find_map(|token| match token {
            PatternToken::Char(c) => Some(*c),
            _ => None,
        });
        match delimiter {
            None => Some(input.len()),
            Some(c) if c.is_ascii_alphabetic() => {
                let upper = find_top_level(input, c, from);
                let lower = find_top_level(input, c.to_ascii_lowercase(), from);
                match (upper, lower) {
                    (Some(u), Some(l)) => Some(u.min(l)),
                    (u, l) => u.or(l),
                }
            }
            Some(c) => find_top_level(input, c, from),
        }
    }
}

/// Result of a successful pattern match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'t> {
    pub pattern: &'t str,
    pub value: u8,
    pub field_a: Option<String>,
    pub field_b: Option<String>,
    pub literal: Option<String>,
}

/// Ordered list of compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: Vec<Pattern>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pattern: Pattern) -> Result<(), String> {
        if self.entries.iter().any(|p| p.text == pattern.text) {
            return Err(format!("duplicate pattern `{}`", pattern.text));
        }
        self.entries.push(pattern);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.entries
    }

    /// First pattern in table order that consumes all of `input`.
    pub fn find(&self, input: &str) -> Option<PatternMatch<'_>> {
        let input = input.trim();
        self.entries.iter().find_map(|p| p.match_text(input))
    }
}

/// The three tables an assembler needs.
#[derive(Debug, Clone)]
pub struct OperandTables {
    version: String,
    basic: PatternTable,
    non_basic: PatternTable,
    values: PatternTable,
}

impl OperandTables {
    /// Built-in DCPU-16 table.
    pub fn dcpu16() -> Result<Self, TableError> {
        Self::parse(DCPU16_TABLE)
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| TableError::new(None, format!("{}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TableError> {
        let mut tables = Self {
            version: String::new(),
            basic: PatternTable::new(),
            non_basic: PatternTable::new(),
            values: PatternTable::new(),
        };
        for (idx, raw) in text.lines().enumerate() {
            let line_num = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let kind = parts.next().unwrap_or_default();
            if kind == "version" {
                tables.version = parts.collect::<Vec<_>>().join(" ");
                continue;
            }
            let (Some(value), Some(pattern), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(TableError::new(
                    Some(line_num),
                    "expected `<kind> <hex> <pattern>`",
                ));
            };
            let value = u8::from_str_radix(value, 16).map_err(|_| {
                TableError::new(Some(line_num), format!("invalid byte value `{value}`"))
            })?;
            let table = match kind {
                "o" => &mut tables.basic,
                "n" => &mut tables.non_basic,
                "a,b" => &mut tables.values,
                other => {
                    return Err(TableError::new(
                        Some(line_num),
                        format!("unknown entry kind `{other}`"),
                    ))
                }
            };
            let compiled =
                Pattern::compile(pattern, value).map_err(|msg| TableError::new(Some(line_num), msg))?;
            table
                .push(compiled)
                .map_err(|msg| TableError::new(Some(line_num), msg))?;
        }
        if tables.basic.is_empty() || tables.values.is_empty() {
            return Err(TableError::new(
                None,
                "table needs at least one basic opcode and one operand value",
            ));
        }
        Ok(tables)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn basic(&self) -> &PatternTable {
        &self.basic
    }

    pub fn non_basic(&self) -> &PatternTable {
        &self.non_basic
    }

    pub fn values(&self) -> &PatternTable {
        &self.values
    }

    /// Match one operand sub-field against the value table.
    pub fn describe_operand(&self, text: &str) -> Option<OperandDescriptor> {
        self.values.find(text).map(|m| OperandDescriptor {
            selector: m.value,
            literal: m.literal,
            pattern: m.pattern.to_string(),
        })
    }
}
