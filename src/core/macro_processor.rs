// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Macro definitions, invocation parsing and parameter substitution.

use crate::core::statement::directive_name;
use crate::core::text_utils::{map_names, split_top_level};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroError {
    message: String,
}

impl MacroError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for MacroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for MacroError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
}

impl Macro {
    /// Body with every formal parameter token replaced by its argument.
    pub fn expand(&self, args: &[String]) -> Vec<String> {
        self.body
            .iter()
            .map(|line| {
                map_names(line, |name| {
                    self.params
                        .iter()
                        .position(|param| param == name)
                        .and_then(|idx| args.get(idx).cloned())
                })
            })
            .collect()
    }
}

/// Macros in definition order. Overloads by argument count are allowed;
/// the first definition with a matching name and arity wins.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    macros: Vec<Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mac: Macro) {
        self.macros.push(mac);
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn macros(&self) -> &[Macro] {
        &self.macros
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.macros.iter().any(|m| m.name == name)
    }

    pub fn find(&self, name: &str, arity: usize) -> Option<&Macro> {
        self.macros
            .iter()
            .find(|m| m.name == name && m.params.len() == arity)
    }
}

/// Header of a `.macro` line: name and formal parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroHeader {
    pub name: String,
    pub params: Vec<String>,
    /// Definition text as written after the directive, without a brace.
    pub signature: String,
}

/// True for `.macro` / `#macro` lines.
pub fn is_macro_start(code: &str) -> bool {
    directive_name(code).is_some_and(|d| d.eq_ignore_ascii_case("macro"))
}

/// True for the lines that close a macro body.
pub fn is_macro_end(code: &str) -> bool {
    code == "}"
        || directive_name(code).is_some_and(|d| d.eq_ignore_ascii_case("endmacro"))
}

/// Parse `.macro Name(p1, p2) {`.
pub fn parse_macro_header(code: &str) -> Result<MacroHeader, MacroError> {
    let rest = code
        .split_once([' ', '\t'])
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    let signature = rest.strip_suffix('{').unwrap_or(rest).trim().to_string();
    if signature.is_empty() {
        return Err(MacroError::new("Macro name is required"));
    }
    let (name, params) = match signature.find('(') {
        Some(open) => {
            let name = signature[..open].trim();
            let Some(inner) = signature[open + 1..].strip_suffix(')') else {
                return Err(MacroError::new("Unterminated macro parameter list"));
            };
            (name, parse_params(inner)?)
        }
        None => (signature.as_str(), Vec::new()),
    };
    if !is_valid_macro_name(name) {
        return Err(MacroError::new(format!("Invalid macro name: {name}")));
    }
    Ok(MacroHeader {
        name: name.to_string(),
        params,
        signature: signature.clone(),
    })
}

fn parse_params(text: &str) -> Result<Vec<String>, MacroError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut params = Vec::new();
    for part in text.split(',') {
        let param = part.trim();
        if !is_valid_param(param) {
            return Err(MacroError::new(format!(
                "Invalid macro parameter name: {param}"
            )));
        }
        if params.iter().any(|p| p == param) {
            return Err(MacroError::new(format!(
                "Duplicate macro parameter: {param}"
            )));
        }
        params.push(param.to_string());
    }
    Ok(params)
}

fn is_valid_param(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_macro_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// A line that looks like `Name(arg, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroInvocation {
    pub name: String,
    pub args: Vec<String>,
}

/// Split an invocation candidate into name and top-level arguments.
pub fn parse_invocation(code: &str) -> Option<MacroInvocation> {
    let open = code.find('(')?;
    let name = code[..open].trim();
    if name.is_empty() || !is_valid_macro_name(name) {
        return None;
    }
    let inner = code[open + 1..].trim_end().strip_suffix(')')?;
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, b',')
    };
    Some(MacroInvocation {
        name: name.to_string(),
        args,
    })
}
