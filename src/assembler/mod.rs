// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! DCPU-16 assembler - main entry point.
//!
//! This module ties the preprocessor, the fixed-point encoder and the output
//! writers together behind the [`Assembler`] builder.

pub mod cli;
mod directives;
pub mod encoder;
mod eval;
pub mod output;
mod passes;
mod preprocess;
#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::assembler::conditional::ConditionalStack;
use crate::core::assembler::error::{
    AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, PassCounts, Severity,
};
use crate::core::assembler::listing::{ListingLine, ListingWriter};
use crate::core::assembler::scope::LocalScope;
use crate::core::expr::{Evaluation, ExpressionEvaluator, StandardEvaluator};
use crate::core::macro_processor::MacroTable;
use crate::core::operand_table::{OperandTables, TableError};
use crate::core::source_map::SourceMap;
use crate::core::statement::{ErrorCode, Statement};
use crate::core::symbol_table::SymbolTable;

use eval::{evaluate_at, qualify_locals};
use preprocess::Preprocessor;

pub use directives::{
    is_conditional_directive, DirectiveHandler, DirectiveOutcome, StandardDirectives,
};
pub use encoder::{relax, CircularReference, MAX_RELAXATION_PASSES};

// Re-export public types
pub use crate::core::assembler::error::{AsmRunError as RunError, AsmRunReport as RunReport};
pub use cli::VERSION;

/// Default limit on nested macro expansions.
pub const DEFAULT_MACRO_DEPTH: usize = 64;

/// Diagnostic code of a relaxation that never settled.
pub const CIRCULAR_REFERENCE_CODE: &str = "wf010";

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    passes::run()
}

pub fn run_with_cli(cli: &cli::Cli) -> Result<AsmRunReport, AsmRunError> {
    passes::run_with_cli(cli)
}

/// State threaded through preprocessing: tables filled while scanning, the
/// address counter and the include bookkeeping.
#[derive(Debug)]
pub struct AssemblyContext {
    pub symbols: SymbolTable,
    pub macros: MacroTable,
    pub scope: LocalScope,
    pub conditionals: ConditionalStack,
    pub source_map: SourceMap,
    pub address: u16,
    pub listing: bool,
    pub include_paths: Vec<PathBuf>,
    included: HashSet<String>,
    relocation: Option<u32>,
    next_relocation_group: u32,
}

impl AssemblyContext {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self {
            symbols: SymbolTable::new(),
            macros: MacroTable::new(),
            scope: LocalScope::new(),
            conditionals: ConditionalStack::new(),
            source_map: SourceMap::new(),
            address: 0,
            listing: true,
            include_paths,
            included: HashSet::new(),
            relocation: None,
            next_relocation_group: 0,
        }
    }

    /// Qualify local references in `text` with the current global label.
    pub fn qualify_expr(&self, text: &str) -> String {
        qualify_locals(text, self.scope.prior_global(), false)
    }

    /// Evaluate `text` at the location of `stmt`.
    pub fn evaluate(
        &self,
        evaluator: &dyn ExpressionEvaluator,
        text: &str,
        stmt: &Statement,
    ) -> Evaluation {
        evaluate_at(evaluator, text, &self.symbols, stmt.address, stmt.root_line)
    }

    /// Group id of the open relocation region, if any.
    pub fn relocation_group(&self) -> Option<u32> {
        self.relocation
    }

    /// Open a relocation region. `None` when one is already open.
    pub fn open_relocation(&mut self) -> Option<u32> {
        if self.relocation.is_some() {
            return None;
        }
        let group = self.next_relocation_group;
        self.next_relocation_group += 1;
        self.relocation = Some(group);
        Some(group)
    }

    /// Close the open relocation region; false when none is open.
    pub fn close_relocation(&mut self) -> bool {
        self.relocation.take().is_some()
    }

    pub fn is_included(&self, path: &str) -> bool {
        self.included.contains(path)
    }

    pub fn mark_included(&mut self, path: &str) {
        self.included.insert(path.to_string());
    }
}

/// Result of a [`LineHook`] looking at a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum HookOutcome {
    /// Keep processing the (possibly rewritten) line.
    Continue,
    /// The hook produced the statement; it is emitted as is.
    Handled,
}

/// Sees every non-empty line before label and directive handling.
pub trait LineHook {
    fn intercept(&mut self, code: &mut String, stmt: &mut Statement) -> HookOutcome;
}

/// Assembler configuration. Each instance assembles one source.
pub struct Assembler {
    tables: OperandTables,
    evaluator: Box<dyn ExpressionEvaluator>,
    directives: Box<dyn DirectiveHandler>,
    hook: Option<Box<dyn LineHook>>,
    include_paths: Vec<PathBuf>,
    macro_depth: usize,
}

impl Assembler {
    /// Assembler over the built-in DCPU-16 tables.
    pub fn new() -> Result<Self, TableError> {
        Ok(Self::with_tables(OperandTables::dcpu16()?))
    }

    pub fn with_tables(tables: OperandTables) -> Self {
        Self {
            tables,
            evaluator: Box::new(StandardEvaluator),
            directives: Box::new(StandardDirectives),
            hook: None,
            include_paths: Vec::new(),
            macro_depth: DEFAULT_MACRO_DEPTH,
        }
    }

    /// Add search directories for `<path>` includes; `paths` may hold
    /// several entries separated by `;`.
    pub fn with_include_path(mut self, paths: &str) -> Self {
        self.include_paths.extend(
            paths
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        );
        self
    }

    pub fn with_include_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.include_paths.extend(paths);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_directives(mut self, directives: Box<dyn DirectiveHandler>) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_hook(mut self, hook: Box<dyn LineHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_macro_depth(mut self, depth: usize) -> Self {
        self.macro_depth = depth;
        self
    }

    /// Assemble `source`; `file_name` names it in provenance and anchors
    /// relative includes.
    pub fn assemble(self, source: &str, file_name: &str) -> Assembly {
        let Assembler {
            tables,
            evaluator,
            directives,
            hook,
            include_paths,
            macro_depth,
        } = self;
        let ctx = AssemblyContext::new(include_paths);
        let preprocessor = Preprocessor::new(
            &tables,
            evaluator.as_ref(),
            directives.as_ref(),
            hook,
            ctx,
            macro_depth,
        );
        let (mut statements, ctx) = preprocessor.run(source, file_name);
        let mut symbols = ctx.symbols;
        let outcome = relax(&mut statements, &mut symbols, evaluator.as_ref());
        Assembly {
            statements,
            symbols,
            macros: ctx.macros,
            source_map: ctx.source_map,
            outcome,
        }
    }

    pub fn assemble_file(self, path: &Path) -> Result<Assembly, AsmRunError> {
        let name = path.display().to_string();
        let source = fs::read_to_string(path).map_err(|err| {
            AsmRunError::new(
                AsmError::new(
                    AsmErrorKind::Io,
                    "Error opening file",
                    Some(&format!("{name}: {err}")),
                ),
                Vec::new(),
            )
        })?;
        Ok(self.assemble(&source, &name))
    }
}

/// Output of one assembly.
#[derive(Debug)]
pub struct Assembly {
    pub statements: Vec<Statement>,
    pub symbols: SymbolTable,
    pub macros: MacroTable,
    pub source_map: SourceMap,
    /// Passes the encoder took, or the cap failure.
    pub outcome: Result<u32, CircularReference>,
}

impl Assembly {
    pub fn passes(&self) -> Option<u32> {
        self.outcome.ok()
    }

    pub fn error_count(&self) -> usize {
        let circular = usize::from(self.outcome.is_err());
        self.statements.iter().filter(|s| s.error.is_some()).count() + circular
    }

    pub fn warning_count(&self) -> usize {
        self.statements
            .iter()
            .filter(|s| s.error.is_none() && s.warning.is_some())
            .count()
    }

    /// Output words of every statement, in statement order.
    pub fn image(&self) -> Vec<u16> {
        self.statements
            .iter()
            .flat_map(|s| s.words.iter().copied())
            .collect()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for stmt in &self.statements {
            let diag = if let Some(err) = stmt.error {
                let error = AsmError::new(error_kind(err), err.message(), Some(&stmt.code));
                Diagnostic::new(stmt.line, Severity::Error, error).with_code(err.code())
            } else if let Some(warning) = stmt.warning {
                let error = AsmError::new(
                    AsmErrorKind::Instruction,
                    warning.message(),
                    Some(&stmt.code),
                );
                Diagnostic::new(stmt.line, Severity::Warning, error).with_code(warning.code())
            } else {
                continue;
            };
            let mut diag = diag
                .with_file(Some(stmt.file.clone()))
                .with_source(Some(stmt.code.clone()));
            if let Some(name) = self
                .source_map
                .origin_for_root(stmt.root_line)
                .and_then(|origin| origin.expansion.as_deref())
            {
                diag = diag.with_note(format!("expanded from macro `{name}`"));
            }
            out.push(diag);
        }
        if let Err(err) = self.outcome {
            let error = AsmError::new(AsmErrorKind::Assembler, &err.to_string(), None);
            let file = self.statements.first().map(|s| s.file.clone());
            out.push(
                Diagnostic::new(0, Severity::Error, error)
                    .with_code(CIRCULAR_REFERENCE_CODE)
                    .with_file(file)
                    .with_help("break the cycle between literal sizes and label addresses, or force long literals with .longform"),
            );
        }
        out
    }

    pub fn report(&self) -> AsmRunReport {
        AsmRunReport::new(self.diagnostics(), self.passes().unwrap_or(0))
    }

    pub fn counts(&self) -> PassCounts {
        PassCounts {
            lines: self.source_map.len() as u32,
            errors: self.error_count() as u32,
            warnings: self.warning_count() as u32,
        }
    }

    /// Text listing of the listed statements followed by the symbol table.
    pub fn write_listing<W: Write>(&self, out: W, title: &str) -> io::Result<()> {
        let mut writer = ListingWriter::new(out);
        writer.header(title)?;
        for stmt in self.statements.iter().filter(|s| s.listed) {
            writer.write_line(ListingLine::from_statement(stmt))?;
        }
        writer.footer(&self.counts(), &self.symbols)
    }
}

fn error_kind(err: ErrorCode) -> AsmErrorKind {
    match err {
        ErrorCode::InvalidLabel | ErrorCode::DuplicateName => AsmErrorKind::Symbol,
        ErrorCode::FileNotFound => AsmErrorKind::Io,
        ErrorCode::InvalidMacroDefinition
        | ErrorCode::UncoupledStatement
        | ErrorCode::ExpansionTooDeep => AsmErrorKind::Preprocess,
        ErrorCode::InvalidOpcode => AsmErrorKind::Instruction,
        ErrorCode::IllegalExpression => AsmErrorKind::Expression,
        ErrorCode::InvalidDirective => AsmErrorKind::Directive,
    }
}
