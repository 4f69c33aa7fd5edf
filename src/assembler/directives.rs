// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Directive handling.
//!
//! Includes, macros, relocation regions and the encoder markers
//! (`.longform`, `.shortform`, `.uniquescope`) are owned by the
//! preprocessor. Everything else goes through a [`DirectiveHandler`];
//! [`StandardDirectives`] is the default set.

use log::info;

use crate::core::expr::ExpressionEvaluator;
use crate::core::statement::{directive_args, ErrorCode, NamedValue, Statement};
use crate::core::symbol_table::SymbolTableResult;
use crate::core::text_utils::{is_name_char, split_top_level};

use super::eval::depends_on_layout;
use super::AssemblyContext;

/// Conditional directives reach the handler even inside skipped blocks.
pub const CONDITIONAL_DIRECTIVES: &[&str] =
    &["if", "elif", "elseif", "else", "endif", "ifdef", "ifndef"];

pub fn is_conditional_directive(name: &str) -> bool {
    CONDITIONAL_DIRECTIVES
        .iter()
        .any(|d| d.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DirectiveOutcome {
    Handled,
    Unknown,
}

/// Parser for the directives the preprocessor does not own.
///
/// `name` is the directive keyword without its `.`/`#` prefix. Errors are
/// reported by setting `stmt.error`; emitted words go into `stmt.words` and
/// advance the address counter once the handler returns.
pub trait DirectiveHandler {
    fn handle(
        &self,
        name: &str,
        stmt: &mut Statement,
        ctx: &mut AssemblyContext,
        evaluator: &dyn ExpressionEvaluator,
    ) -> DirectiveOutcome;
}

/// The built-in directive set.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDirectives;

impl DirectiveHandler for StandardDirectives {
    fn handle(
        &self,
        name: &str,
        stmt: &mut Statement,
        ctx: &mut AssemblyContext,
        evaluator: &dyn ExpressionEvaluator,
    ) -> DirectiveOutcome {
        let args = directive_args(&stmt.code).to_string();
        match name.to_ascii_lowercase().as_str() {
            "org" => set_origin(&args, stmt, ctx, evaluator),
            "dat" | "dw" => emit_data(&args, stmt, ctx, evaluator),
            "equ" => define_value(&args, false, stmt, ctx, evaluator),
            "define" => define_value(&args, true, stmt, ctx, evaluator),
            "fill" => fill(&args, stmt, ctx, evaluator),
            "reserve" => reserve(&args, stmt, ctx, evaluator),
            "if" => {
                let taken = !ctx.conditionals.skipping() && condition(&args, stmt, ctx, evaluator);
                ctx.conditionals.open(taken);
            }
            "elif" | "elseif" => {
                let taken = ctx.conditionals.wants_branch() && condition(&args, stmt, ctx, evaluator);
                if ctx.conditionals.else_if(taken).is_err() {
                    stmt.error = Some(ErrorCode::UncoupledStatement);
                }
            }
            "else" => {
                if ctx.conditionals.otherwise().is_err() {
                    stmt.error = Some(ErrorCode::UncoupledStatement);
                }
            }
            "endif" => {
                if ctx.conditionals.close().is_err() {
                    stmt.error = Some(ErrorCode::UncoupledStatement);
                }
            }
            "ifdef" | "ifndef" => {
                let defined = ctx.symbols.contains(&ctx.scope.qualify(&args));
                let want = name.eq_ignore_ascii_case("ifdef");
                ctx.conditionals.open(defined == want);
            }
            "nolist" => ctx.listing = false,
            "list" => ctx.listing = true,
            "echo" => info!("{}:{}: {}", stmt.file, stmt.line, args),
            _ => return DirectiveOutcome::Unknown,
        }
        DirectiveOutcome::Handled
    }
}

fn set_origin(
    args: &str,
    stmt: &mut Statement,
    ctx: &mut AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    let qualified = ctx.qualify_expr(args);
    match ctx.evaluate(evaluator, &qualified, stmt).value {
        Ok(origin) => {
            stmt.address = origin;
            stmt.origin_reset = true;
        }
        Err(_) => stmt.error = Some(ErrorCode::IllegalExpression),
    }
}

fn emit_data(
    args: &str,
    stmt: &mut Statement,
    ctx: &mut AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    if args.is_empty() {
        stmt.error = Some(ErrorCode::IllegalExpression);
        return;
    }
    for item in split_top_level(args, b',') {
        if item.is_empty() {
            stmt.error = Some(ErrorCode::IllegalExpression);
            return;
        }
        if let Some(text) = item.strip_prefix('"') {
            match parse_string(text) {
                Some(chars) => stmt.words.extend(chars),
                None => {
                    stmt.error = Some(ErrorCode::IllegalExpression);
                    return;
                }
            }
            continue;
        }
        push_value(&item, stmt, ctx, evaluator);
    }
}

/// Evaluate one word now, or reserve it for the encoder when the value can
/// still move.
fn push_value(
    text: &str,
    stmt: &mut Statement,
    ctx: &AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    let qualified = ctx.qualify_expr(text);
    let eval = ctx.evaluate(evaluator, &qualified, stmt);
    match eval.value {
        Ok(value) if !depends_on_layout(&eval, &qualified) => stmt.words.push(value),
        _ => {
            stmt.postponed.insert(stmt.words.len(), qualified);
            stmt.words.push(0);
        }
    }
}

/// Body of a double-quoted string (opening quote already stripped), one word
/// per character.
fn parse_string(text: &str) -> Option<Vec<u16>> {
    let mut words = Vec::new();
    let mut chars = text.chars();
    loop {
        match chars.next()? {
            '"' => break,
            '\\' => {
                let esc = match chars.next()? {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '0' => '\0',
                    other => other,
                };
                words.push(esc as u16);
            }
            ch => words.push(ch as u16),
        }
    }
    chars.as_str().trim().is_empty().then_some(words)
}

fn define_value(
    args: &str,
    default_one: bool,
    stmt: &mut Statement,
    ctx: &mut AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    let (name, value_text) = match args.split_once([' ', '\t', ',']) {
        Some((name, rest)) => (name, rest.trim().trim_start_matches(',').trim()),
        None => (args, ""),
    };
    if !is_valid_name(name) {
        stmt.error = Some(ErrorCode::InvalidLabel);
        return;
    }
    let mut expression = None;
    let value = if value_text.is_empty() {
        if !default_one {
            stmt.error = Some(ErrorCode::IllegalExpression);
            return;
        }
        1
    } else {
        let qualified = ctx.qualify_expr(value_text);
        let eval = ctx.evaluate(evaluator, &qualified, stmt);
        match eval.value {
            Ok(value) => {
                if depends_on_layout(&eval, &qualified) {
                    expression = Some(qualified);
                }
                value
            }
            Err(_) => {
                stmt.error = Some(ErrorCode::IllegalExpression);
                return;
            }
        }
    };
    let name = ctx.scope.qualify(name);
    if ctx.symbols.define_value(&name, value) == SymbolTableResult::Duplicate {
        stmt.error = Some(ErrorCode::DuplicateName);
        return;
    }
    stmt.definition = expression.map(|expression| NamedValue { name, expression });
}

fn fill(
    args: &str,
    stmt: &mut Statement,
    ctx: &mut AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    let parts = split_top_level(args, b',');
    let Some(count) = count_of(&parts[0], stmt, ctx, evaluator) else {
        return;
    };
    match parts.get(1) {
        None => stmt.words = vec![0; count],
        Some(value_text) if parts.len() == 2 => {
            let qualified = ctx.qualify_expr(value_text);
            let eval = ctx.evaluate(evaluator, &qualified, stmt);
            match eval.value {
                Ok(value) if !depends_on_layout(&eval, &qualified) => {
                    stmt.words = vec![value; count]
                }
                _ => {
                    stmt.words = vec![0; count];
                    for idx in 0..count {
                        stmt.postponed.insert(idx, qualified.clone());
                    }
                }
            }
        }
        Some(_) => stmt.error = Some(ErrorCode::IllegalExpression),
    }
}

fn reserve(
    args: &str,
    stmt: &mut Statement,
    ctx: &mut AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) {
    if let Some(count) = count_of(args, stmt, ctx, evaluator) {
        stmt.words = vec![0; count];
    }
}

/// Word count argument; must be resolvable when the directive is read.
fn count_of(
    text: &str,
    stmt: &mut Statement,
    ctx: &AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) -> Option<usize> {
    let qualified = ctx.qualify_expr(text);
    match ctx.evaluate(evaluator, &qualified, stmt).value {
        Ok(count) => Some(usize::from(count)),
        Err(_) => {
            stmt.error = Some(ErrorCode::IllegalExpression);
            None
        }
    }
}

fn condition(
    args: &str,
    stmt: &mut Statement,
    ctx: &AssemblyContext,
    evaluator: &dyn ExpressionEvaluator,
) -> bool {
    let qualified = ctx.qualify_expr(args);
    match ctx.evaluate(evaluator, &qualified, stmt).value {
        Ok(value) => value != 0,
        Err(_) => {
            stmt.error = Some(ErrorCode::IllegalExpression);
            false
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let body = match bytes.first() {
        Some(b'.') => &bytes[1..],
        Some(c) if c.is_ascii_alphabetic() => bytes,
        _ => return false,
    };
    !body.is_empty() && body.iter().all(|&c| is_name_char(c))
}
