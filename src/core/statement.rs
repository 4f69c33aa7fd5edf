// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Statement stream produced by preprocessing and completed by the encoder.

use std::collections::BTreeMap;
use std::fmt;

/// Classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Label,
    BasicInstruction,
    NonBasicInstruction,
    Directive,
}

/// Per-statement error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidLabel,
    DuplicateName,
    FileNotFound,
    InvalidMacroDefinition,
    UncoupledStatement,
    InvalidOpcode,
    IllegalExpression,
    InvalidDirective,
    ExpansionTooDeep,
}

impl ErrorCode {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCode::InvalidLabel => "wf001",
            ErrorCode::DuplicateName => "wf002",
            ErrorCode::FileNotFound => "wf003",
            ErrorCode::InvalidMacroDefinition => "wf004",
            ErrorCode::UncoupledStatement => "wf005",
            ErrorCode::InvalidOpcode => "wf006",
            ErrorCode::IllegalExpression => "wf007",
            ErrorCode::InvalidDirective => "wf008",
            ErrorCode::ExpansionTooDeep => "wf009",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::InvalidLabel => "Invalid label",
            ErrorCode::DuplicateName => "Duplicate name",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::InvalidMacroDefinition => "Invalid macro definition",
            ErrorCode::UncoupledStatement => "Uncoupled statement",
            ErrorCode::InvalidOpcode => "Invalid opcode",
            ErrorCode::IllegalExpression => "Illegal expression",
            ErrorCode::InvalidDirective => "Invalid directive",
            ErrorCode::ExpansionTooDeep => "Macro expansion nested too deeply",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Advisory warning codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    RedundantStatement,
    AssignToLiteral,
}

impl WarningCode {
    pub fn code(self) -> &'static str {
        match self {
            WarningCode::RedundantStatement => "wf101",
            WarningCode::AssignToLiteral => "wf102",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            WarningCode::RedundantStatement => "Redundant statement",
            WarningCode::AssignToLiteral => "Assignment to a literal",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Matched opcode entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeDescriptor {
    pub value: u8,
    pub pattern: String,
}

/// Matched operand entry. `literal` holds the expression text when the
/// addressing mode carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandDescriptor {
    pub selector: u8,
    pub literal: Option<String>,
    pub pattern: String,
}

/// Named value whose expression is recomputed on every encoder pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedValue {
    pub name: String,
    pub expression: String,
}

/// One entry of the statement stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub code: String,
    pub file: String,
    pub line: u32,
    pub root_line: u32,
    pub address: u16,
    pub kind: StatementKind,
    pub opcode: Option<OpcodeDescriptor>,
    pub operand_a: Option<OperandDescriptor>,
    pub operand_b: Option<OperandDescriptor>,
    pub words: Vec<u16>,
    /// Word index to expression text still to be evaluated by the encoder.
    pub postponed: BTreeMap<usize, String>,
    pub error: Option<ErrorCode>,
    /// `error` was raised by the encoder and is re-checked on every pass.
    pub unresolved: bool,
    pub warning: Option<WarningCode>,
    pub listed: bool,
    /// Qualified name defined by a label statement.
    pub label: Option<String>,
    /// Set by directives that move the address counter.
    pub origin_reset: bool,
    pub definition: Option<NamedValue>,
}

impl Statement {
    pub fn new(code: &str, file: &str, line: u32, root_line: u32, address: u16) -> Self {
        Self {
            code: code.to_string(),
            file: file.to_string(),
            line,
            root_line,
            address,
            kind: StatementKind::Directive,
            opcode: None,
            operand_a: None,
            operand_b: None,
            words: Vec::new(),
            postponed: BTreeMap::new(),
            error: None,
            unresolved: false,
            warning: None,
            listed: true,
            label: None,
            origin_reset: false,
            definition: None,
        }
    }

    /// A copy of the provenance with new code text.
    pub fn sibling(&self, code: &str) -> Self {
        let mut stmt = Self::new(code, &self.file, self.line, self.root_line, self.address);
        stmt.listed = self.listed;
        stmt
    }

    pub fn with_error(mut self, error: ErrorCode) -> Self {
        self.error = Some(error);
        self
    }

    pub fn word_count(&self) -> u16 {
        self.words.len() as u16
    }

    pub fn is_instruction(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::BasicInstruction | StatementKind::NonBasicInstruction
        )
    }

    /// Code compared case-insensitively against a directive name, accepting
    /// both the `.` and `#` prefixes.
    pub fn is_directive(&self, name: &str) -> bool {
        directive_name(&self.code).is_some_and(|d| d.eq_ignore_ascii_case(name))
    }
}

/// Directive keyword of a line (without prefix), if it is one.
pub fn directive_name(code: &str) -> Option<&str> {
    let rest = code
        .strip_prefix('.')
        .or_else(|| code.strip_prefix('#'))?;
    let end = rest
        .find(|c: char| c == ' ' || c == '\t')
        .unwrap_or(rest.len());
    let name = &rest[..end];
    (!name.is_empty()).then_some(name)
}

/// Argument text following a directive keyword.
pub fn directive_args(code: &str) -> &str {
    match code.find([' ', '\t']) {
        Some(idx) => code[idx..].trim(),
        None => "",
    }
}
