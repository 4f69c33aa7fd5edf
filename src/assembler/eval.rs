// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation against the symbol table at a statement's location.

use std::cell::Cell;

use crate::core::expr::{EvalContext, Evaluation, ExpressionEvaluator};
use crate::core::symbol_table::SymbolTable;
use crate::core::text_utils::{contains_unquoted, map_names};

/// Evaluation context for one statement: symbols, `$` and relative labels.
///
/// Also records the latest root line any resolved name was defined on, so
/// the encoder can tell whether a value depends on code after it.
pub(crate) struct StatementContext<'a> {
    symbols: &'a SymbolTable,
    address: u16,
    root_line: u32,
    reach: Cell<u32>,
}

impl<'a> StatementContext<'a> {
    pub(crate) fn new(symbols: &'a SymbolTable, address: u16, root_line: u32) -> Self {
        Self {
            symbols,
            address,
            root_line,
            reach: Cell::new(root_line),
        }
    }

    /// Highest root line the evaluated names were defined on, never below
    /// the statement's own.
    pub(crate) fn reach(&self) -> u32 {
        self.reach.get()
    }

    fn note(&self, root_line: u32) {
        self.reach.set(self.reach.get().max(root_line));
    }
}

impl EvalContext for StatementContext<'_> {
    fn lookup_symbol(&self, name: &str) -> Option<i64> {
        if let Some(label) = self.symbols.label(name) {
            self.note(label.root_line);
        }
        self.symbols.lookup(name).map(i64::from)
    }

    fn current_address(&self) -> Option<i64> {
        Some(i64::from(self.address))
    }

    fn relative_label(&self, forward: bool) -> Option<i64> {
        let (root_line, address) = self.symbols.relative_entry(self.root_line, forward)?;
        self.note(root_line);
        Some(i64::from(address))
    }
}

/// Evaluate `text` at `address` / `root_line`.
pub(crate) fn evaluate_at(
    evaluator: &dyn ExpressionEvaluator,
    text: &str,
    symbols: &SymbolTable,
    address: u16,
    root_line: u32,
) -> Evaluation {
    let ctx = StatementContext::new(symbols, address, root_line);
    evaluator.evaluate(text, &ctx)
}

/// True when the value of `text` can still change while relaxation moves
/// code: it names a symbol or reads `$`.
pub(crate) fn depends_on_layout(eval: &Evaluation, text: &str) -> bool {
    !eval.references.is_empty() || contains_unquoted(text, b'$')
}

/// Rewrite local references (`.name`) in expression text as
/// `<prior_global>_name`. With `underscore`, names with a leading `_` are
/// rewritten the same way.
pub(crate) fn qualify_locals(text: &str, prior_global: &str, underscore: bool) -> String {
    map_names(text, |name| {
        let local = name
            .strip_prefix('.')
            .or_else(|| underscore.then(|| name.strip_prefix('_')).flatten())?;
        if local.is_empty() {
            return None;
        }
        Some(format!("{prior_global}_{local}"))
    })
}
