// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Preprocessing: turns source text into the flat statement stream.
//!
//! Lines are pulled from a stack of frames. A file frame holds the lines of
//! one source file; an expansion frame holds lines synthesized from one
//! origin line (a macro invocation or a backslash continuation) and reports
//! that origin's file and line number. Every pulled line gets the next root
//! line number.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::core::expr::ExpressionEvaluator;
use crate::core::macro_processor::{
    is_macro_end, parse_invocation, parse_macro_header, Macro, MacroInvocation,
};
use crate::core::operand_table::OperandTables;
use crate::core::source_map::{SourceMap, SourceOrigin};
use crate::core::statement::{
    directive_args, directive_name, ErrorCode, OpcodeDescriptor, OperandDescriptor, Statement,
    StatementKind,
};
use crate::core::symbol_table::{Label, SymbolTableResult};
use crate::core::text_utils::{find_top_level, normalize_line, split_continuations, unquote_path};

use super::directives::{is_conditional_directive, DirectiveHandler, DirectiveOutcome};
use super::eval::qualify_locals;
use super::{AssemblyContext, HookOutcome, LineHook};

/// One line pulled from the frame stack.
#[derive(Debug, Clone)]
struct SourceLine {
    text: String,
    file: String,
    line: u32,
    root_line: u32,
    expansion: Option<String>,
}

#[derive(Debug)]
enum FrameKind {
    File { base_dir: PathBuf },
    Macro,
    Continuation,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    file: String,
    line: u32,
    expansion: Option<String>,
    lines: Vec<String>,
    next: usize,
}

impl Frame {
    fn file(name: &str, base_dir: PathBuf, text: &str) -> Self {
        Self {
            kind: FrameKind::File { base_dir },
            file: name.to_string(),
            line: 0,
            expansion: None,
            lines: text.lines().map(str::to_string).collect(),
            next: 0,
        }
    }

    fn expansion(
        kind: FrameKind,
        origin: &SourceLine,
        expansion: Option<String>,
        lines: Vec<String>,
    ) -> Self {
        Self {
            kind,
            file: origin.file.clone(),
            line: origin.line,
            expansion,
            lines,
            next: 0,
        }
    }

    fn take(&mut self, source_map: &mut SourceMap) -> Option<SourceLine> {
        let text = self.lines.get(self.next)?.clone();
        self.next += 1;
        if matches!(self.kind, FrameKind::File { .. }) {
            self.line += 1;
        }
        let mut origin = SourceOrigin::new(&self.file, self.line);
        if let Some(name) = &self.expansion {
            origin = origin.expanded_from(name);
        }
        let root_line = source_map.push(origin);
        Some(SourceLine {
            text,
            file: self.file.clone(),
            line: self.line,
            root_line,
            expansion: self.expansion.clone(),
        })
    }
}

/// Pull-based line source over the frame stack.
#[derive(Debug, Default)]
struct LineSource {
    frames: Vec<Frame>,
}

impl LineSource {
    fn next_line(&mut self, source_map: &mut SourceMap) -> Option<SourceLine> {
        while let Some(frame) = self.frames.last_mut() {
            if let Some(line) = frame.take(source_map) {
                return Some(line);
            }
            self.frames.pop();
        }
        None
    }

    /// Next line of the innermost frame; `None` once that frame is exhausted.
    fn next_in_frame(&mut self, source_map: &mut SourceMap) -> Option<SourceLine> {
        self.frames.last_mut()?.take(source_map)
    }

    fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Macro frames currently on the stack, finished ones included.
    fn macro_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| matches!(f.kind, FrameKind::Macro))
            .count()
    }

    fn base_dir(&self) -> PathBuf {
        self.frames
            .iter()
            .rev()
            .find_map(|f| match &f.kind {
                FrameKind::File { base_dir } => Some(base_dir.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Drop the innermost file frame and everything expanded from it.
    fn end_file(&mut self) {
        while let Some(frame) = self.frames.pop() {
            if matches!(frame.kind, FrameKind::File { .. }) {
                break;
            }
        }
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Label at the start of a line: the token as written, its name, and the
/// rest of the line.
fn split_label(code: &str) -> Option<(&str, &str, &str)> {
    if let Some(body) = code.strip_prefix(':') {
        let end = body.find(' ').unwrap_or(body.len());
        return Some((&code[..end + 1], &body[..end], body[end..].trim()));
    }
    let idx = find_top_level(code, b':', 0)?;
    let name = &code[..idx];
    if name.is_empty() || name.contains(' ') {
        return None;
    }
    Some((&code[..idx + 1], name, code[idx + 1..].trim()))
}

fn is_valid_label(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '.') {
        return false;
    }
    let body = name.strip_prefix('.').unwrap_or(name);
    !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// `dat ...` and `name .equ value` spellings.
fn rewrite_legacy(code: &str) -> String {
    let mut words = code.splitn(3, ' ');
    let first = words.next().unwrap_or_default();
    if first.eq_ignore_ascii_case("dat") {
        return format!(".{code}");
    }
    if directive_name(code).is_none() {
        if let Some(second) = words.next() {
            if second.eq_ignore_ascii_case(".equ") {
                let rest = words.next().unwrap_or_default();
                return format!(".equ {first} {rest}").trim_end().to_string();
            }
        }
    }
    code.to_string()
}

/// Converts source text into statements, filling the context's symbol,
/// macro and source tables along the way.
pub(crate) struct Preprocessor<'a> {
    tables: &'a OperandTables,
    evaluator: &'a dyn ExpressionEvaluator,
    directives: &'a dyn DirectiveHandler,
    hook: Option<Box<dyn LineHook>>,
    max_depth: usize,
    source: LineSource,
    ctx: AssemblyContext,
    output: Vec<Statement>,
    open_relocation: Option<usize>,
}

impl<'a> Preprocessor<'a> {
    pub(crate) fn new(
        tables: &'a OperandTables,
        evaluator: &'a dyn ExpressionEvaluator,
        directives: &'a dyn DirectiveHandler,
        hook: Option<Box<dyn LineHook>>,
        ctx: AssemblyContext,
        max_depth: usize,
    ) -> Self {
        Self {
            tables,
            evaluator,
            directives,
            hook,
            max_depth,
            source: LineSource::default(),
            ctx,
            output: Vec::new(),
            open_relocation: None,
        }
    }

    pub(crate) fn run(mut self, source: &str, file_name: &str) -> (Vec<Statement>, AssemblyContext) {
        let base_dir = base_dir_of(Path::new(file_name));
        self.source.push(Frame::file(file_name, base_dir, source));
        while let Some(line) = self.source.next_line(&mut self.ctx.source_map) {
            self.process_line(line);
        }
        if let Some(idx) = self.open_relocation.take() {
            self.output[idx].error = Some(ErrorCode::UncoupledStatement);
        }
        if !self.ctx.conditionals.is_empty() {
            debug!(
                "{} conditional block(s) still open at end of input",
                self.ctx.conditionals.depth()
            );
        }
        (self.output, self.ctx)
    }

    fn emit(&mut self, stmt: Statement) {
        self.ctx.address = stmt.address.wrapping_add(stmt.word_count());
        self.output.push(stmt);
    }

    fn process_line(&mut self, line: SourceLine) {
        let mut code = normalize_line(&line.text);
        if code.is_empty() {
            return;
        }
        let pieces = split_continuations(&code);
        if pieces.len() > 1 {
            let lines = pieces.into_iter().map(|p| p.trim().to_string()).collect();
            let frame = Frame::expansion(
                FrameKind::Continuation,
                &line,
                line.expansion.clone(),
                lines,
            );
            self.source.push(frame);
            return;
        }

        let mut stmt = Statement::new(&code, &line.file, line.line, line.root_line, self.ctx.address);
        stmt.listed = self.ctx.listing;
        if let Some(hook) = self.hook.as_mut() {
            if hook.intercept(&mut code, &mut stmt) == HookOutcome::Handled {
                self.emit(stmt);
                return;
            }
            stmt.code.clone_from(&code);
        }

        if self.ctx.conditionals.skipping()
            && !directive_name(&code).is_some_and(is_conditional_directive)
        {
            return;
        }

        if let Some((token, name, rest)) = split_label(&code) {
            let rest = rest.to_string();
            if !self.define_label(stmt.sibling(token), name) || rest.is_empty() {
                return;
            }
            stmt = stmt.sibling(&rest);
            code = rest;
        }

        let code = rewrite_legacy(&code);
        stmt.code.clone_from(&code);
        if let Some(name) = directive_name(&code) {
            let name = name.to_ascii_lowercase();
            self.directive(&name, stmt);
            return;
        }
        if let Some(invocation) = parse_invocation(&code) {
            if self.ctx.macros.has_name(&invocation.name) {
                if let Some(stmt) = self.invoke(stmt, invocation, &line) {
                    self.instruction(stmt);
                }
                return;
            }
        }
        self.instruction(stmt);
    }

    /// Define the label of a label statement. Returns false when the rest of
    /// the line must be dropped.
    fn define_label(&mut self, mut stmt: Statement, name: &str) -> bool {
        stmt.kind = StatementKind::Label;
        if name == "$" {
            self.ctx.symbols.define_relative(stmt.root_line, stmt.address);
            self.emit(stmt);
            return true;
        }
        if !is_valid_label(name) {
            self.emit(stmt.with_error(ErrorCode::InvalidLabel));
            return false;
        }
        let qualified = self.ctx.scope.qualify(name);
        let label = Label {
            name: qualified.clone(),
            line: stmt.line,
            root_line: stmt.root_line,
            address: stmt.address,
            relocation_group: self.ctx.relocation_group(),
        };
        if self.ctx.symbols.define_label(label) == SymbolTableResult::Duplicate {
            self.emit(stmt.with_error(ErrorCode::DuplicateName));
            return false;
        }
        if !name.starts_with('.') {
            self.ctx.scope.set_global(name);
        }
        stmt.label = Some(qualified);
        self.emit(stmt);
        true
    }

    fn directive(&mut self, name: &str, mut stmt: Statement) {
        match name {
            "include" => return self.include(stmt),
            "incbin" => return self.include_binary(stmt, false),
            "incpack" => return self.include_binary(stmt, true),
            "macro" => return self.define_macro(stmt),
            "endfile" => self.source.end_file(),
            "endmacro" => stmt.error = Some(ErrorCode::UncoupledStatement),
            "relocate" => {
                if self.ctx.open_relocation().is_some() {
                    stmt.words = vec![0];
                    self.open_relocation = Some(self.output.len());
                } else {
                    stmt.error = Some(ErrorCode::UncoupledStatement);
                }
            }
            "endrelocate" => {
                if self.ctx.close_relocation() {
                    self.open_relocation = None;
                } else {
                    stmt.error = Some(ErrorCode::UncoupledStatement);
                }
            }
            "uniquescope" => {
                self.ctx.scope.enter_unique();
            }
            "longform" | "shortform" => {}
            _ => {
                if self
                    .directives
                    .handle(name, &mut stmt, &mut self.ctx, self.evaluator)
                    == DirectiveOutcome::Unknown
                {
                    stmt.error = Some(ErrorCode::InvalidDirective);
                }
            }
        }
        self.emit(stmt);
    }

    fn resolve_path(&self, text: &str, angle: bool) -> Option<PathBuf> {
        if angle {
            let found = self
                .ctx
                .include_paths
                .iter()
                .map(|dir| dir.join(text))
                .find(|path| path.is_file());
            if found.is_some() {
                return found;
            }
        }
        let path = Path::new(text);
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source.base_dir().join(path)
        };
        full.is_file().then_some(full)
    }

    fn include(&mut self, mut stmt: Statement) {
        let (text, angle) = unquote_path(directive_args(&stmt.code));
        let text = text.to_string();
        let Some(path) = self.resolve_path(&text, angle) else {
            self.emit(stmt.with_error(ErrorCode::FileNotFound));
            return;
        };
        if self.ctx.is_included(&text) {
            debug!("skipping repeated include of {text}");
            self.emit(stmt);
            return;
        }
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                debug!("cannot read {}: {err}", path.display());
                stmt.error = Some(ErrorCode::FileNotFound);
                self.emit(stmt);
                return;
            }
        };
        debug!("including {}", path.display());
        self.ctx.mark_included(&text);
        self.emit(stmt);
        let name = path.display().to_string();
        self.source
            .push(Frame::file(&name, base_dir_of(&path), &contents));
    }

    fn include_binary(&mut self, mut stmt: Statement, packed: bool) {
        let (text, angle) = unquote_path(directive_args(&stmt.code));
        let text = text.to_string();
        let bytes = match self.resolve_path(&text, angle).map(fs::read) {
            Some(Ok(bytes)) => bytes,
            _ => {
                self.emit(stmt.with_error(ErrorCode::FileNotFound));
                return;
            }
        };
        stmt.words = if packed {
            bytes
                .chunks(2)
                .map(|pair| {
                    let low = pair.get(1).copied().unwrap_or(0);
                    (u16::from(pair[0]) << 8) | u16::from(low)
                })
                .collect()
        } else {
            bytes.into_iter().map(u16::from).collect()
        };
        debug!("{} word(s) from {}", stmt.words.len(), text);
        self.emit(stmt);
    }

    /// Collect a macro body from the defining frame and re-emit the
    /// definition as directive statements.
    fn define_macro(&mut self, mut stmt: Statement) {
        let header = parse_macro_header(&stmt.code);
        let mut body: Vec<SourceLine> = Vec::new();
        let mut end = None;
        while let Some(line) = self.source.next_in_frame(&mut self.ctx.source_map) {
            let text = normalize_line(&line.text);
            if is_macro_end(&text) {
                end = Some(line);
                break;
            }
            if text.is_empty() || text == "{" {
                continue;
            }
            body.push(SourceLine { text, ..line });
        }
        let (header, end) = match (header, end) {
            (Err(err), _) => {
                debug!("{}:{}: {}", stmt.file, stmt.line, err);
                self.emit(stmt.with_error(ErrorCode::InvalidMacroDefinition));
                return;
            }
            (Ok(_), None) => {
                self.emit(stmt.with_error(ErrorCode::UncoupledStatement));
                return;
            }
            (Ok(header), Some(end)) => (header, end),
        };
        self.ctx.macros.register(Macro {
            name: header.name.clone(),
            params: header.params.clone(),
            body: body.iter().map(|line| line.text.clone()).collect(),
        });
        stmt.code = format!(".macro {}", header.signature);
        self.emit(stmt);
        for line in body {
            let mut body_stmt =
                Statement::new(&line.text, &line.file, line.line, line.root_line, self.ctx.address);
            body_stmt.listed = self.ctx.listing;
            self.emit(body_stmt);
        }
        let mut closing = Statement::new(
            ".endmacro",
            &end.file,
            end.line,
            end.root_line,
            self.ctx.address,
        );
        closing.listed = self.ctx.listing;
        self.emit(closing);
    }

    /// Expand a macro invocation. Returns the statement back when no macro
    /// of that arity exists so it can be matched as an instruction.
    fn invoke(
        &mut self,
        mut stmt: Statement,
        invocation: MacroInvocation,
        origin: &SourceLine,
    ) -> Option<Statement> {
        let Some(mac) = self
            .ctx
            .macros
            .find(&invocation.name, invocation.args.len())
        else {
            return Some(stmt);
        };
        let lines = mac.expand(&invocation.args);
        if self.source.macro_depth() >= self.max_depth {
            stmt.error = Some(ErrorCode::ExpansionTooDeep);
            self.emit(stmt);
            return None;
        }
        self.emit(stmt);
        let frame = Frame::expansion(FrameKind::Macro, origin, Some(invocation.name), lines);
        self.source.push(frame);
        None
    }

    fn instruction(&mut self, mut stmt: Statement) {
        let tables = self.tables;
        let (kind, found) = match tables.basic().find(&stmt.code) {
            Some(found) => (StatementKind::BasicInstruction, found),
            None => match tables.non_basic().find(&stmt.code) {
                Some(found) => (StatementKind::NonBasicInstruction, found),
                None => {
                    self.emit(stmt.with_error(ErrorCode::InvalidOpcode));
                    return;
                }
            },
        };
        let describe = |field: Option<&str>| field.and_then(|f| tables.describe_operand(f));
        let operand_a = describe(found.field_a.as_deref());
        let operand_b = describe(found.field_b.as_deref());
        let complete = match kind {
            StatementKind::BasicInstruction => operand_a.is_some() && operand_b.is_some(),
            _ => operand_a.is_some(),
        };
        if !complete {
            self.emit(stmt.with_error(ErrorCode::InvalidOpcode));
            return;
        }

        let non_basic = kind == StatementKind::NonBasicInstruction;
        let prior = self.ctx.scope.prior_global().to_string();
        let qualify = |operand: Option<OperandDescriptor>| {
            operand.map(|mut desc| {
                desc.literal = desc
                    .literal
                    .map(|lit| qualify_locals(&lit, &prior, non_basic));
                desc
            })
        };
        stmt.kind = kind;
        stmt.opcode = Some(OpcodeDescriptor {
            value: found.value,
            pattern: found.pattern.to_string(),
        });
        stmt.operand_a = qualify(operand_a);
        stmt.operand_b = qualify(operand_b);

        // Long form until the encoder proves a literal fits.
        stmt.words = vec![0];
        let literals = [&stmt.operand_a, &stmt.operand_b]
            .into_iter()
            .filter_map(|op| op.as_ref().and_then(|d| d.literal.clone()))
            .collect::<Vec<_>>();
        for literal in literals {
            stmt.postponed.insert(stmt.words.len(), literal);
            stmt.words.push(0);
        }
        self.emit(stmt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_forms() {
        assert_eq!(split_label("loop: SET A, 1"), Some(("loop:", "loop", "SET A, 1")));
        assert_eq!(split_label(":start"), Some((":start", "start", "")));
        assert_eq!(split_label(":start SET PC, 0"), Some((":start", "start", "SET PC, 0")));
        assert_eq!(split_label("$: SET PC, $-"), Some(("$:", "$", "SET PC, $-")));
        assert_eq!(split_label(".dat ':'"), None);
        assert_eq!(split_label(".echo time: now"), None);
        assert_eq!(split_label("SET A, 1"), None);
    }

    #[test]
    fn label_validation() {
        assert!(is_valid_label("main"));
        assert!(is_valid_label(".inner"));
        assert!(is_valid_label("a.b_2"));
        assert!(!is_valid_label("_hidden"));
        assert!(!is_valid_label("2nd"));
        assert!(!is_valid_label("."));
        assert!(!is_valid_label("bad-name"));
    }

    #[test]
    fn legacy_spellings() {
        assert_eq!(rewrite_legacy("dat 1, 2"), ".dat 1, 2");
        assert_eq!(rewrite_legacy("DAT \"x\""), ".DAT \"x\"");
        assert_eq!(rewrite_legacy("WIDTH .equ 32"), ".equ WIDTH 32");
        assert_eq!(rewrite_legacy(".equ WIDTH 32"), ".equ WIDTH 32");
        assert_eq!(rewrite_legacy("SET A, 1"), "SET A, 1");
    }

    #[test]
    fn frames_report_origin_and_number_root_lines() {
        let mut map = SourceMap::new();
        let mut source = LineSource::default();
        source.push(Frame::file("main.dasm", PathBuf::new(), "a\nb"));
        let first = source.next_line(&mut map).expect("line");
        assert_eq!((first.line, first.root_line), (1, 1));
        source.push(Frame::expansion(
            FrameKind::Macro,
            &first,
            Some("m".to_string()),
            vec!["x".to_string(), "y".to_string()],
        ));
        assert_eq!(source.macro_depth(), 1);
        let x = source.next_line(&mut map).expect("x");
        let y = source.next_line(&mut map).expect("y");
        assert_eq!((x.line, x.root_line, y.line, y.root_line), (1, 2, 1, 3));
        assert_eq!(y.expansion.as_deref(), Some("m"));
        assert!(source.next_in_frame(&mut map).is_none());
        let b = source.next_line(&mut map).expect("b");
        assert_eq!((b.text.as_str(), b.line, b.root_line), ("b", 2, 4));
        assert!(source.next_line(&mut map).is_none());
        assert_eq!(map.len(), 4);
    }
}
