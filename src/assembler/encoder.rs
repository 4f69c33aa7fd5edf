// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Fixed-point encoding of the statement stream.
//!
//! Each pass re-evaluates every postponed expression and re-encodes every
//! instruction with the addresses of the previous pass. A literal operand A
//! that fits the short form shrinks its instruction by one word; any size
//! change moves the statements and labels behind it at once, so later
//! statements in the same pass already see the new layout. A pass is
//! unstable only when a size change lands in front of a value it already
//! computed (a forward reference), and the loop runs until a stable pass or
//! the pass cap. Named values defined from labels or `$` are recomputed at
//! their statement; a changed value also makes the pass unstable.

use std::fmt;

use log::{debug, trace, warn};

use crate::core::expr::ExpressionEvaluator;
use crate::core::operand_table::{SELECTOR_NEXT_WORD, SELECTOR_NEXT_WORD_INDIRECT};
use crate::core::statement::{
    directive_name, ErrorCode, OperandDescriptor, Statement, StatementKind, WarningCode,
};
use crate::core::symbol_table::SymbolTable;

use super::eval::StatementContext;

/// Passes after which relaxation gives up.
pub const MAX_RELAXATION_PASSES: u32 = 10_000;

/// Largest literal that fits the short form, besides 0xFFFF.
const SHORT_LITERAL_MAX: u16 = 30;
const SHORT_LITERAL_BASE: u16 = 0x21;

/// Relaxation did not settle within [`MAX_RELAXATION_PASSES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularReference {
    pub passes: u32,
}

impl fmt::Display for CircularReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circular reference: addresses did not settle after {} passes",
            self.passes
        )
    }
}

impl std::error::Error for CircularReference {}

struct OpenRelocation {
    group: u32,
    table_index: usize,
    addresses: Vec<u16>,
}

#[derive(Default)]
struct PassState {
    force_long: bool,
    in_macro: bool,
    relocation: Option<OpenRelocation>,
    next_group: u32,
    /// Latest root line any value computed so far in this pass depends on.
    reach: u32,
    unstable: bool,
    changes: usize,
}

impl PassState {
    fn depends_on(&mut self, reach: u32) {
        self.reach = self.reach.max(reach);
    }

    /// Word offset `address` carries a value from `references`; record it
    /// when one of them belongs to the open relocation group.
    fn note_relocation(&mut self, symbols: &SymbolTable, references: &[String], address: u16) {
        if let Some(open) = self.relocation.as_mut() {
            if references
                .iter()
                .any(|name| symbols.in_relocation_group(name, open.group))
            {
                open.addresses.push(address);
            }
        }
    }
}

/// Run relaxation passes until the layout is stable. Returns the number of
/// passes taken.
pub fn relax(
    statements: &mut [Statement],
    symbols: &mut SymbolTable,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<u32, CircularReference> {
    for pass in 1..=MAX_RELAXATION_PASSES {
        let state = encode_pass(statements, symbols, evaluator);
        debug!(
            "relaxation pass {pass}: {} size change(s){}",
            state.changes,
            if state.unstable { ", unstable" } else { "" }
        );
        if !state.unstable {
            return Ok(pass);
        }
    }
    warn!("relaxation did not settle after {MAX_RELAXATION_PASSES} passes");
    Err(CircularReference {
        passes: MAX_RELAXATION_PASSES,
    })
}

fn encode_pass(
    statements: &mut [Statement],
    symbols: &mut SymbolTable,
    evaluator: &dyn ExpressionEvaluator,
) -> PassState {
    let mut state = PassState::default();
    for index in 0..statements.len() {
        let stmt = &mut statements[index];
        if stmt
            .error
            .is_some_and(|err| err != ErrorCode::IllegalExpression)
        {
            continue;
        }
        let before = stmt.words.len();
        match stmt.kind {
            StatementKind::Label => {}
            StatementKind::Directive => {
                if let Some(table) = scan_directive(index, stmt, &mut state) {
                    resize(statements, symbols, &mut state, table.0, table.1);
                    continue;
                }
                evaluate_postponed(stmt, symbols, evaluator, &mut state);
                redefine_value(stmt, symbols, evaluator, &mut state);
            }
            StatementKind::BasicInstruction | StatementKind::NonBasicInstruction => {
                encode_instruction(stmt, symbols, evaluator, &mut state);
            }
        }
        let after = statements[index].words.len();
        if after != before {
            note_resize(statements, symbols, &mut state, index, before, after);
        }
    }
    state
}

/// Apply a directive's effect on the pass state. Returns the index and new
/// words of a relocation table completed by `.endrelocate`.
fn scan_directive(
    index: usize,
    stmt: &Statement,
    state: &mut PassState,
) -> Option<(usize, Vec<u16>)> {
    let name = directive_name(&stmt.code)?.to_ascii_lowercase();
    if state.in_macro {
        // Macro bodies are listed, never assembled.
        if name == "endmacro" {
            state.in_macro = false;
        }
        return None;
    }
    match name.as_str() {
        "longform" => state.force_long = true,
        "shortform" => state.force_long = false,
        "macro" => state.in_macro = true,
        "relocate" => {
            state.relocation = Some(OpenRelocation {
                group: state.next_group,
                table_index: index,
                addresses: Vec::new(),
            });
            state.next_group += 1;
        }
        "endrelocate" => {
            let open = state.relocation.take()?;
            let mut table = Vec::with_capacity(open.addresses.len() + 1);
            table.push(open.addresses.len() as u16);
            table.extend(open.addresses);
            return Some((open.table_index, table));
        }
        _ => {}
    }
    None
}

/// Replace the words of `statements[index]` and shift what follows.
fn resize(
    statements: &mut [Statement],
    symbols: &mut SymbolTable,
    state: &mut PassState,
    index: usize,
    words: Vec<u16>,
) {
    let before = statements[index].words.len();
    let after = words.len();
    statements[index].words = words;
    if after != before {
        note_resize(statements, symbols, state, index, before, after);
    }
}

fn note_resize(
    statements: &mut [Statement],
    symbols: &mut SymbolTable,
    state: &mut PassState,
    index: usize,
    before: usize,
    after: usize,
) {
    let root = statements[index].root_line;
    let delta = after as i32 - before as i32;
    state.changes += 1;
    if state.reach > root {
        state.unstable = true;
    }
    shift_following(statements, symbols, index, delta);
}

/// Move statements after `index` up to the next origin reset, and the
/// labels defined in that range, by `delta` words.
fn shift_following(
    statements: &mut [Statement],
    symbols: &mut SymbolTable,
    index: usize,
    delta: i32,
) {
    let root = statements[index].root_line;
    let mut until = None;
    for stmt in statements[index + 1..].iter_mut() {
        if stmt.origin_reset {
            until = Some(stmt.root_line);
            break;
        }
        stmt.address = stmt.address.wrapping_add_signed(delta as i16);
    }
    let moved = symbols.shift(root, until, delta);
    trace!(
        "{}:{}: shifted by {delta}, {moved} label(s) moved",
        statements[index].file,
        statements[index].line
    );
}

fn evaluate_postponed(
    stmt: &mut Statement,
    symbols: &SymbolTable,
    evaluator: &dyn ExpressionEvaluator,
    state: &mut PassState,
) {
    if stmt.postponed.is_empty() {
        return;
    }
    let ctx = StatementContext::new(symbols, stmt.address, stmt.root_line);
    let mut failed = false;
    for (&slot, text) in &stmt.postponed {
        let eval = evaluator.evaluate(text, &ctx);
        match eval.value {
            Ok(value) => {
                if let Some(word) = stmt.words.get_mut(slot) {
                    *word = value;
                }
                let address = stmt.address.wrapping_add(slot as u16);
                state.note_relocation(symbols, &eval.references, address);
            }
            Err(_) => failed = true,
        }
    }
    state.depends_on(ctx.reach());
    mark_unresolved(stmt, failed);
}

/// Recompute a named value that depends on the layout. Statements before
/// this one may have read the old value, so a change makes the pass
/// unstable.
fn redefine_value(
    stmt: &mut Statement,
    symbols: &mut SymbolTable,
    evaluator: &dyn ExpressionEvaluator,
    state: &mut PassState,
) {
    let Some(definition) = stmt.definition.as_ref() else {
        return;
    };
    let (value, reach) = {
        let ctx = StatementContext::new(symbols, stmt.address, stmt.root_line);
        let eval = evaluator.evaluate(&definition.expression, &ctx);
        (eval.value, ctx.reach())
    };
    state.depends_on(reach);
    match value {
        Ok(value) => {
            if symbols.update_value(&definition.name, value) {
                trace!("{} is now {value}", definition.name);
                state.changes += 1;
                state.unstable = true;
            }
            mark_unresolved(stmt, false);
        }
        Err(_) => mark_unresolved(stmt, true),
    }
}

/// Record or clear an expression failure found by the encoder. Errors set
/// before encoding are left alone.
fn mark_unresolved(stmt: &mut Statement, failed: bool) {
    if failed {
        if stmt.error.is_none() {
            stmt.error = Some(ErrorCode::IllegalExpression);
            stmt.unresolved = true;
        }
    } else if stmt.unresolved {
        stmt.error = None;
        stmt.unresolved = false;
    }
}

/// Encoded operand: selector bits plus the extra word when long.
struct EncodedOperand {
    selector: u16,
    word: Option<(u16, String)>,
}

fn encode_operand(
    desc: &OperandDescriptor,
    short_allowed: bool,
    ctx: &StatementContext<'_>,
    evaluator: &dyn ExpressionEvaluator,
    failed: &mut bool,
    references: &mut Vec<String>,
) -> EncodedOperand {
    let selector = u16::from(desc.selector);
    let Some(literal) = desc.literal.as_ref() else {
        return EncodedOperand {
            selector,
            word: None,
        };
    };
    let eval = evaluator.evaluate(literal, ctx);
    let value = match eval.value {
        Ok(value) => value,
        Err(_) => {
            *failed = true;
            0
        }
    };
    let short = !*failed
        && short_allowed
        && desc.selector == SELECTOR_NEXT_WORD
        && (value == 0xFFFF || value <= SHORT_LITERAL_MAX);
    if short {
        return EncodedOperand {
            selector: value.wrapping_add(SHORT_LITERAL_BASE) & 0x3F,
            word: None,
        };
    }
    references.clear();
    references.extend(eval.references);
    EncodedOperand {
        selector,
        word: Some((value, literal.clone())),
    }
}

fn mnemonic(stmt: &Statement) -> &str {
    let pattern = stmt.opcode.as_ref().map_or("", |op| op.pattern.as_str());
    let end = pattern
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(pattern.len());
    &pattern[..end]
}

fn instruction_warning(stmt: &Statement) -> Option<WarningCode> {
    let (a, b) = (stmt.operand_a.as_ref()?, stmt.operand_b.as_ref()?);
    let mnemonic = mnemonic(stmt).to_ascii_uppercase();
    if b.selector == SELECTOR_NEXT_WORD && !mnemonic.starts_with("IF") {
        return Some(WarningCode::AssignToLiteral);
    }
    let redundant = a.selector == b.selector
        && a.selector != SELECTOR_NEXT_WORD_INDIRECT
        && matches!(mnemonic.as_str(), "SET" | "AND" | "BOR");
    redundant.then_some(WarningCode::RedundantStatement)
}

fn encode_instruction(
    stmt: &mut Statement,
    symbols: &SymbolTable,
    evaluator: &dyn ExpressionEvaluator,
    state: &mut PassState,
) {
    let Some(opcode) = stmt.opcode.as_ref().map(|op| u16::from(op.value)) else {
        return;
    };
    let ctx = StatementContext::new(symbols, stmt.address, stmt.root_line);
    let mut failed = false;
    let mut b_refs = Vec::new();
    let mut a_refs = Vec::new();
    let b = stmt
        .operand_b
        .as_ref()
        .map(|desc| encode_operand(desc, false, &ctx, evaluator, &mut failed, &mut b_refs));
    let short_allowed = !state.force_long && state.relocation.is_none();
    let Some(a) = stmt
        .operand_a
        .as_ref()
        .map(|desc| encode_operand(desc, short_allowed, &ctx, evaluator, &mut failed, &mut a_refs))
    else {
        return;
    };
    state.depends_on(ctx.reach());

    let first = match (&b, stmt.kind) {
        (Some(b), StatementKind::BasicInstruction) => opcode | (b.selector << 5) | (a.selector << 10),
        _ => (opcode << 5) | (a.selector << 10),
    };
    let mut words = vec![first];
    stmt.postponed.clear();
    for (operand, references) in [(Some(a), a_refs), (b, b_refs)] {
        if let Some((value, literal)) = operand.and_then(|op| op.word) {
            let address = stmt.address.wrapping_add(words.len() as u16);
            state.note_relocation(symbols, &references, address);
            stmt.postponed.insert(words.len(), literal);
            words.push(value);
        }
    }
    stmt.words = words;
    mark_unresolved(stmt, failed);
    stmt.warning = instruction_warning(stmt);
}
