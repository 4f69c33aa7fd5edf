// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use super::cli::tests::with_env_vars;
use super::cli::Cli;
use super::{
    relax, run_with_cli, Assembler, Assembly, AssemblyContext, CircularReference, DirectiveHandler,
    DirectiveOutcome, HookOutcome, LineHook, StandardDirectives, CIRCULAR_REFERENCE_CODE,
    MAX_RELAXATION_PASSES,
};
use crate::core::assembler::error::Severity;
use crate::core::expr::{EvalContext, Evaluation, ExpressionEvaluator, StandardEvaluator};
use crate::core::statement::{ErrorCode, Statement, StatementKind, WarningCode};
use clap::Parser;
use proptest::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

fn create_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join(format!("test-{label}-{}-{nanos}", process::id()));
    fs::create_dir_all(&dir).expect("Create temp dir");
    dir
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Create parent dir");
    }
    fs::write(path, contents).expect("Write test file");
}

fn assemble(source: &str) -> Assembly {
    Assembler::new()
        .expect("built-in tables")
        .assemble(source, "main.dasm")
}

fn assemble_path(path: &Path) -> Assembly {
    Assembler::new()
        .expect("built-in tables")
        .assemble_file(path)
        .expect("readable source")
}

fn errors(assembly: &Assembly) -> Vec<ErrorCode> {
    assembly.statements.iter().filter_map(|s| s.error).collect()
}

fn basic(op: u16, b: u16, a: u16) -> u16 {
    op | (b << 5) | (a << 10)
}

fn short(value: u16) -> u16 {
    value.wrapping_add(0x21) & 0x3F
}

#[test]
fn long_literal_uses_next_word() {
    let assembly = assemble("SET A, 0x30\n");
    assert_eq!(assembly.image(), vec![0x7C01, 0x0030]);
    assert_eq!(assembly.passes(), Some(1));
    assert_eq!(assembly.error_count(), 0);
}

#[test]
fn short_literal_boundaries() {
    let assembly = assemble("SET A, 30\nSET A, 31\nSET A, -1\nSET A, 0xFFFF\n");
    assert_eq!(
        assembly.image(),
        vec![0xFC01, 0x7C01, 31, 0x8001, 0x8001]
    );
    let sizes: Vec<usize> = assembly.statements.iter().map(|s| s.words.len()).collect();
    assert_eq!(sizes, vec![1, 2, 1, 1]);
    let addresses: Vec<u16> = assembly.statements.iter().map(|s| s.address).collect();
    assert_eq!(addresses, vec![0, 1, 3, 4]);
}

#[test]
fn operand_b_literal_is_never_short() {
    let assembly = assemble("IFE 5, A\n");
    assert_eq!(assembly.image(), vec![basic(0x12, 0x1F, 0x00), 5]);
    assert_eq!(assembly.warning_count(), 0);
}

#[test]
fn extra_words_follow_operand_order_a_then_b() {
    let assembly = assemble("SET [0x1000], 0x2000\n");
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x1E, 0x1F), 0x2000, 0x1000]
    );
}

#[test]
fn register_and_stack_operands() {
    let assembly = assemble(
        "SET PUSH, X\nSET Y, POP\nSET [SP], PEEK\nSET [J+4], [B]\nSET EX, [SP+2]\nADD [4+I], SP\n",
    );
    assert_eq!(
        assembly.image(),
        vec![
            basic(0x01, 0x18, 0x03),
            basic(0x01, 0x04, 0x18),
            basic(0x01, 0x19, 0x19),
            basic(0x01, 0x17, 0x09),
            4,
            basic(0x01, 0x1D, 0x1A),
            2,
            basic(0x02, 0x16, 0x1B),
            4,
        ]
    );
}

#[test]
fn non_basic_instructions_use_the_a_slot() {
    let assembly = assemble("JSR 0x1234\nJSR 4\nHWI A\n");
    assert_eq!(
        assembly.image(),
        vec![
            (0x01 << 5) | (0x1F << 10),
            0x1234,
            (0x01 << 5) | (short(4) << 10),
            0x12 << 5,
        ]
    );
    assert_eq!(
        assembly.statements[0].kind,
        StatementKind::NonBasicInstruction
    );
}

#[test]
fn mnemonics_and_registers_are_case_insensitive() {
    let assembly = assemble("set a, 1\nSet B, c\n");
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(1)), basic(0x01, 0x01, 0x02)]
    );
}

#[test]
fn unknown_mnemonic_reports_invalid_opcode() {
    let assembly = assemble("FOO A, 1\nSET A\n");
    assert_eq!(
        errors(&assembly),
        vec![ErrorCode::InvalidOpcode, ErrorCode::InvalidOpcode]
    );
    assert!(assembly.image().is_empty());
    let diagnostics = assembly.diagnostics();
    assert_eq!(diagnostics[0].code(), "wf006");
    assert_eq!(diagnostics[0].file(), Some("main.dasm"));
    assert_eq!(diagnostics[1].line(), 2);
}

#[test]
fn forward_reference_settles_in_two_passes() {
    let assembly = assemble("SET PC, end\nSET A, 1\nend: SET B, 2\n");
    assert_eq!(assembly.passes(), Some(2));
    assert_eq!(assembly.symbols.lookup("end"), Some(2));
    assert_eq!(
        assembly.image(),
        vec![
            basic(0x01, 0x1C, short(2)),
            basic(0x01, 0x00, short(1)),
            basic(0x01, 0x01, short(2)),
        ]
    );
}

#[test]
fn backward_reference_settles_in_one_pass() {
    let assembly = assemble("loop: SET A, 1\nSET PC, loop\n");
    assert_eq!(assembly.passes(), Some(1));
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(1)), basic(0x01, 0x1C, short(0))]
    );
}

#[test]
fn relaxing_a_settled_stream_is_idempotent() {
    let mut assembly = assemble("SET PC, end\nSET A, 0x40\n.dat end, 3\nend: SET B, 2\n");
    assert!(assembly.passes().is_some());
    let image = assembly.image();
    let again = relax(
        &mut assembly.statements,
        &mut assembly.symbols,
        &StandardEvaluator,
    );
    assert_eq!(again, Ok(1));
    assert_eq!(assembly.image(), image);
}

#[test]
fn oscillating_literal_reports_circular_reference() {
    // Short form moves `end` to 1 (value 31, long); long form moves it to 2
    // (value 0, short).
    let assembly = assemble("SET A, 62 - 31 * end\nend:\n");
    assert_eq!(
        assembly.outcome,
        Err(CircularReference {
            passes: MAX_RELAXATION_PASSES
        })
    );
    assert_eq!(assembly.passes(), None);
    assert_eq!(assembly.error_count(), 1);
    let diagnostics = assembly.diagnostics();
    let last = diagnostics.last().expect("circular diagnostic");
    assert_eq!(last.code(), CIRCULAR_REFERENCE_CODE);
    assert_eq!(last.line(), 0);
    assert!(last.message().contains("did not settle"));
    assert!(!last.help().is_empty());
}

#[test]
fn relocation_table_lists_words_carrying_region_labels() {
    let assembly = assemble(".relocate\nSET [data], 1\ndata: .dat 0\n.endrelocate\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.passes(), Some(2));
    assert_eq!(
        assembly.image(),
        vec![1, 4, basic(0x01, 0x1E, 0x1F), 1, 5, 0]
    );
    assert_eq!(
        assembly.symbols.label("data").and_then(|l| l.relocation_group),
        Some(0)
    );
}

#[test]
fn relocation_region_keeps_literals_long() {
    let assembly = assemble(".relocate\nSET A, 1\n.endrelocate\nSET A, 1\n");
    assert_eq!(
        assembly.image(),
        vec![0, basic(0x01, 0x00, 0x1F), 1, basic(0x01, 0x00, short(1))]
    );
}

#[test]
fn relocation_ignores_values_and_outside_labels() {
    let assembly = assemble(
        "outside: SET A, 1\n.equ SIZE 0x40\n.relocate\ninside: .dat outside, SIZE, inside\n.endrelocate\n",
    );
    // Table [1, offset] at 1..3, data at 3.
    assert_eq!(assembly.image(), vec![0x8801, 1, 5, 0, 0x40, 3]);
}

#[test]
fn macro_bodies_do_not_open_relocation_regions() {
    let assembly = assemble(
        ".macro m() {\n.relocate\n.longform\n.endrelocate\n}\n.relocate\nSET [x], 1\nx:\n.endrelocate\nSET A, 1\n",
    );
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(
        assembly.symbols.label("x").and_then(|l| l.relocation_group),
        Some(0)
    );
    assert_eq!(
        assembly.image(),
        vec![1, 4, basic(0x01, 0x1E, 0x1F), 1, 5, basic(0x01, 0x00, short(1))]
    );
}

#[test]
fn macro_definition_adds_no_words() {
    let assembly = assemble(".macro m() {\n.relocate\n.endrelocate\n}\nSET A, 1\n");
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1))]);
}

#[test]
fn unmatched_relocation_directives_are_uncoupled() {
    let assembly = assemble(".endrelocate\n.relocate\n.relocate\nSET A, 1\n");
    assert_eq!(
        errors(&assembly),
        vec![
            ErrorCode::UncoupledStatement,
            ErrorCode::UncoupledStatement,
            ErrorCode::UncoupledStatement,
        ]
    );
}

#[test]
fn local_labels_are_qualified_with_prior_global() {
    let assembly = assemble("bar: SET A, 1\n.foo: SET B, .foo\nbaz:\n.foo: SET C, .foo\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.symbols.lookup("bar_foo"), Some(1));
    assert_eq!(assembly.symbols.lookup("baz_foo"), Some(2));
    assert_eq!(
        assembly.image(),
        vec![
            basic(0x01, 0x00, short(1)),
            basic(0x01, 0x01, short(1)),
            basic(0x01, 0x02, short(2)),
        ]
    );
}

#[test]
fn duplicate_local_label_in_same_scope_is_rejected() {
    let assembly = assemble("a:\n.x: SET A, 1\n.x: SET B, 1\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::DuplicateName]);
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1))]);
}

#[test]
fn duplicate_names_drop_the_rest_of_the_line() {
    let assembly = assemble("start: SET A, 1\nstart: SET B, 2\n.equ X 1\nX: SET C, 3\n");
    assert_eq!(
        errors(&assembly),
        vec![ErrorCode::DuplicateName, ErrorCode::DuplicateName]
    );
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1))]);
    assert_eq!(assembly.symbols.labels().len(), 1);
    let start = assembly.symbols.label("start").expect("first definition kept");
    assert_eq!((start.address, start.root_line), (0, 1));
    assert_eq!(assembly.symbols.lookup("X"), Some(1));
}

#[test]
fn colon_prefixed_labels_are_accepted() {
    let assembly = assemble(":start SET A, 1\nSET PC, start\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.symbols.lookup("start"), Some(0));
}

#[test]
fn invalid_labels_are_rejected() {
    let assembly = assemble("_hidden: SET A, 1\n9lives: SET A, 2\nbad-name: SET A, 3\n");
    assert_eq!(
        errors(&assembly),
        vec![
            ErrorCode::InvalidLabel,
            ErrorCode::InvalidLabel,
            ErrorCode::InvalidLabel,
        ]
    );
    assert!(assembly.image().is_empty());
}

#[test]
fn relative_labels_resolve_backward_and_forward() {
    let back = assemble("$: SET A, 1\nSET PC, $-\n");
    assert_eq!(
        back.image(),
        vec![basic(0x01, 0x00, short(1)), basic(0x01, 0x1C, short(0))]
    );

    let forward = assemble("SET PC, $+\nSET A, 1\n$: SET B, 2\n");
    assert_eq!(forward.passes(), Some(2));
    assert_eq!(forward.image()[0], basic(0x01, 0x1C, short(2)));
}

#[test]
fn legacy_dat_and_equ_spellings() {
    let assembly = assemble("WIDTH .equ 3\ndat WIDTH, \"hi\"\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.image(), vec![3, 0x68, 0x69]);
}

#[test]
fn data_resolves_forward_labels() {
    let assembly = assemble(".dat 1, \"a\\n\", end\nend:\n");
    assert_eq!(assembly.image(), vec![1, 0x61, 0x0A, 4]);
}

#[test]
fn org_moves_the_address_counter() {
    let assembly = assemble("SET A, 1\n.org 0x100\nhere: SET A, here\n");
    assert_eq!(assembly.symbols.lookup("here"), Some(0x100));
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(1)), 0x7C01, 0x100]
    );
}

#[test]
fn longform_forces_next_word_literals() {
    let assembly = assemble(".longform\nSET A, 1\n.shortform\nSET A, 1\n");
    assert_eq!(
        assembly.image(),
        vec![0x7C01, 1, basic(0x01, 0x00, short(1))]
    );
}

#[test]
fn fill_and_reserve_emit_words() {
    let assembly = assemble(".fill 3, 0xAA\n.reserve 2\n");
    assert_eq!(assembly.image(), vec![0xAA, 0xAA, 0xAA, 0, 0]);
}

#[test]
fn unknown_directive_is_reported() {
    let assembly = assemble(".bogus 1\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::InvalidDirective]);
}

#[test]
fn conditionals_select_one_branch() {
    let assembly = assemble(
        ".equ DEBUG 1\n.if DEBUG\nSET A, 1\n.else\nSET A, 2\n.endif\n.ifdef NOPE\nbad line here\n.endif\n.if 0\n.if 1\nSET B, 1\n.endif\n.elif DEBUG\nSET C, 1\n.endif\n",
    );
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(1)), basic(0x01, 0x02, short(1))]
    );
}

#[test]
fn skipped_blocks_define_no_labels() {
    let assembly = assemble(".ifndef DEBUG\nlive: SET A, 1\n.else\ndead: SET A, 2\n.endif\n");
    assert!(assembly.symbols.contains("live"));
    assert!(!assembly.symbols.contains("dead"));
}

#[test]
fn stray_endif_is_uncoupled() {
    let assembly = assemble(".endif\n.else\n");
    assert_eq!(
        errors(&assembly),
        vec![ErrorCode::UncoupledStatement, ErrorCode::UncoupledStatement]
    );
}

#[test]
fn macro_invocations_expand_with_arguments() {
    let assembly = assemble(".macro inc(r) {\nADD r, 1\n}\ninc(A)\ninc([B])\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(
        assembly.image(),
        vec![basic(0x02, 0x00, short(1)), basic(0x02, 0x09, short(1))]
    );
    assert_eq!(assembly.macros.len(), 1);
    let codes: Vec<&str> = assembly
        .statements
        .iter()
        .take(3)
        .map(|s| s.code.as_str())
        .collect();
    assert_eq!(codes, vec![".macro inc(r)", "ADD r, 1", ".endmacro"]);
}

#[test]
fn expanded_lines_report_the_invocation_line() {
    let assembly = assemble(".macro bad() {\nFOO A\n}\nSET A, 1\nbad()\n");
    let diagnostics = assembly.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].line(), 5);
    assert_eq!(diagnostics[0].code(), "wf006");
    assert!(diagnostics[0]
        .notes()
        .iter()
        .any(|note| note.contains("expanded from macro `bad`")));
}

#[test]
fn macros_overload_by_arity() {
    let assembly = assemble(
        ".macro put(v) {\nSET A, v\n}\n.macro put(v, r) {\nSET r, v\n}\nput(2)\nput(3, B)\nput(1, 2, 3)\n",
    );
    assert_eq!(errors(&assembly), vec![ErrorCode::InvalidOpcode]);
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(2)), basic(0x01, 0x01, short(3))]
    );
}

#[test]
fn bad_macro_header_is_rejected() {
    let assembly = assemble(".macro 1bad() {\nSET A, 1\n}\nSET B, 1\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::InvalidMacroDefinition]);
    assert_eq!(assembly.image(), vec![basic(0x01, 0x01, short(1))]);
}

#[test]
fn stray_endmacro_is_uncoupled() {
    let assembly = assemble(".endmacro\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::UncoupledStatement]);
}

#[test]
fn unterminated_macro_in_include_is_uncoupled() {
    let dir = create_temp_dir("macro-unterminated");
    let main = dir.join("main.dasm");
    write_file(&dir.join("m.inc"), ".macro m() {\nSET A, 1\n");
    write_file(&main, ".include \"m.inc\"\nm()\n");

    let assembly = assemble_path(&main);
    assert_eq!(
        errors(&assembly),
        vec![ErrorCode::UncoupledStatement, ErrorCode::InvalidOpcode]
    );
    assert!(assembly.macros.is_empty());
}

#[test]
fn recursive_macro_stops_at_depth_limit() {
    let assembly = Assembler::new()
        .expect("built-in tables")
        .with_macro_depth(3)
        .assemble(".macro r() {\nr()\n}\nr()\n", "main.dasm");
    assert_eq!(errors(&assembly), vec![ErrorCode::ExpansionTooDeep]);
    assert_eq!(
        assembly.statements.iter().filter(|s| s.code == "r()").count(),
        5
    );

    let default_depth = assemble(".macro r() {\nr()\n}\nr()\n");
    assert_eq!(errors(&default_depth), vec![ErrorCode::ExpansionTooDeep]);
}

#[test]
fn uniquescope_makes_macro_locals_private() {
    let assembly = assemble(
        ".macro spin() {\n.uniquescope\n.loop: SET PC, .loop\n}\nspin()\nspin()\nafter:\n.loop: SET PC, .loop\n",
    );
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.symbols.lookup("_unique0_loop"), Some(0));
    assert_eq!(assembly.symbols.lookup("_unique1_loop"), Some(1));
    assert_eq!(assembly.symbols.lookup("after_loop"), Some(2));
    assert_eq!(
        assembly.image(),
        vec![
            basic(0x01, 0x1C, short(0)),
            basic(0x01, 0x1C, short(1)),
            basic(0x01, 0x1C, short(2)),
        ]
    );
}

#[test]
fn continuations_split_one_line() {
    let assembly = assemble("SET A, 1 \\ SET B, 2\nSET C, 3\n");
    assert_eq!(
        assembly.image(),
        vec![
            basic(0x01, 0x00, short(1)),
            basic(0x01, 0x01, short(2)),
            basic(0x01, 0x02, short(3)),
        ]
    );
    let lines: Vec<u32> = assembly.statements.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![1, 1, 2]);
    let roots: Vec<u32> = assembly.statements.iter().map(|s| s.root_line).collect();
    assert_eq!(roots, vec![2, 3, 4]);
}

#[test]
fn comments_and_blank_lines_produce_nothing() {
    let assembly = assemble("; header\n\n   \nSET A, 1 ; trailing\n");
    assert_eq!(assembly.statements.len(), 1);
    assert_eq!(assembly.statements[0].code, "SET A, 1");
}

#[test]
fn warnings_flag_redundant_and_literal_destinations() {
    let assembly = assemble("SET A, A\nSET 5, A\nIFE 5, A\nSET [0x1000], [0x1000]\nAND B, B\n");
    let warnings: Vec<Option<WarningCode>> =
        assembly.statements.iter().map(|s| s.warning).collect();
    assert_eq!(
        warnings,
        vec![
            Some(WarningCode::RedundantStatement),
            Some(WarningCode::AssignToLiteral),
            None,
            None,
            Some(WarningCode::RedundantStatement),
        ]
    );
    assert_eq!(assembly.warning_count(), 3);
    assert!(assembly
        .diagnostics()
        .iter()
        .all(|diag| diag.severity() == Severity::Warning));
}

#[test]
fn includes_resolve_relative_to_the_including_file() {
    let dir = create_temp_dir("include-relative");
    let main = dir.join("main.dasm");
    write_file(&dir.join("lib/util.inc"), ".include \"more.inc\"\nutil: SET A, MORE\n");
    write_file(&dir.join("lib/more.inc"), ".equ MORE 5\n");
    write_file(
        &main,
        ".include \"lib/util.inc\"\n.include \"lib/util.inc\"\nSET PC, util\n",
    );

    let assembly = assemble_path(&main);
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.symbols.lookup("MORE"), Some(5));
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(5)), basic(0x01, 0x1C, short(0))]
    );
    let util = assembly
        .statements
        .iter()
        .find(|s| s.code == "SET A, MORE")
        .expect("included statement");
    assert!(util.file.ends_with("util.inc"));
    assert_eq!(util.line, 2);
}

#[test]
fn angle_includes_search_include_paths() {
    let dir = create_temp_dir("include-angle");
    let inc = dir.join("inc");
    let src = dir.join("src");
    write_file(&inc.join("defs.inc"), ".equ WIDTH 32\n");
    let main = src.join("main.dasm");
    write_file(&main, ".include <defs.inc>\nSET A, WIDTH - 2\n");

    let assembly = Assembler::new()
        .expect("built-in tables")
        .with_include_path(&format!("{};{}", dir.join("none").display(), inc.display()))
        .assemble_file(&main)
        .expect("readable source");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.image(), vec![0xFC01]);

    let missing = assemble_path(&main);
    assert_eq!(
        errors(&missing),
        vec![ErrorCode::FileNotFound, ErrorCode::IllegalExpression]
    );
}

#[test]
fn missing_include_reports_file_not_found() {
    let assembly = assemble(".include \"nope.inc\"\nSET A, 1\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::FileNotFound]);
    assert_eq!(assembly.diagnostics()[0].code(), "wf003");
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1))]);
}

#[test]
fn binary_includes_emit_bytes_and_packed_pairs() {
    let dir = create_temp_dir("incbin");
    fs::write(dir.join("data.bin"), [0x01u8, 0x02, 0x03]).expect("Write binary");
    let main = dir.join("main.dasm");
    write_file(&main, ".incbin \"data.bin\"\n.incpack \"data.bin\"\n.incbin \"gone.bin\"\n");

    let assembly = assemble_path(&main);
    assert_eq!(errors(&assembly), vec![ErrorCode::FileNotFound]);
    assert_eq!(assembly.image(), vec![1, 2, 3, 0x0102, 0x0300]);
}

#[test]
fn endfile_stops_only_the_current_file() {
    let dir = create_temp_dir("endfile");
    write_file(&dir.join("part.inc"), "SET A, 1\n.endfile\nSET B, 2\n");
    let main = dir.join("main.dasm");
    write_file(&main, ".include \"part.inc\"\nSET C, 3\n");

    let assembly = assemble_path(&main);
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(1)), basic(0x01, 0x02, short(3))]
    );
}

#[test]
fn missing_source_file_is_an_io_error() {
    let dir = create_temp_dir("missing-source");
    let err = Assembler::new()
        .expect("built-in tables")
        .assemble_file(&dir.join("absent.dasm"))
        .expect_err("missing file");
    assert!(err.to_string().contains("Error opening file"));
}

struct Rewriter;

impl LineHook for Rewriter {
    fn intercept(&mut self, code: &mut String, stmt: &mut Statement) -> HookOutcome {
        if code == "!marker" {
            stmt.words = vec![0xBEEF];
            return HookOutcome::Handled;
        }
        if code == "clear" {
            *code = "SET A, 0".to_string();
        }
        HookOutcome::Continue
    }
}

#[test]
fn line_hook_can_rewrite_or_claim_lines() {
    let assembly = Assembler::new()
        .expect("built-in tables")
        .with_hook(Box::new(Rewriter))
        .assemble("clear\n!marker\nSET B, 1\n", "main.dasm");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(
        assembly.image(),
        vec![basic(0x01, 0x00, short(0)), 0xBEEF, basic(0x01, 0x01, short(1))]
    );
    assert_eq!(assembly.statements[0].code, "SET A, 0");
    assert_eq!(assembly.statements[1].address, 1);
}

struct Twice;

impl DirectiveHandler for Twice {
    fn handle(
        &self,
        name: &str,
        stmt: &mut Statement,
        ctx: &mut AssemblyContext,
        evaluator: &dyn ExpressionEvaluator,
    ) -> DirectiveOutcome {
        if name == "twice" {
            stmt.words = vec![7, 7];
            return DirectiveOutcome::Handled;
        }
        StandardDirectives.handle(name, stmt, ctx, evaluator)
    }
}

#[test]
fn custom_directive_handler_extends_the_standard_set() {
    let assembly = Assembler::new()
        .expect("built-in tables")
        .with_directives(Box::new(Twice))
        .assemble("start:\n.twice\n.bogus\nSET A, start\n", "main.dasm");
    assert_eq!(errors(&assembly), vec![ErrorCode::InvalidDirective]);
    assert_eq!(assembly.image(), vec![7, 7, basic(0x01, 0x00, short(0))]);
}

struct Answer;

impl ExpressionEvaluator for Answer {
    fn evaluate(&self, text: &str, ctx: &dyn EvalContext) -> Evaluation {
        if text == "answer" {
            return Evaluation {
                value: Ok(42),
                references: Vec::new(),
            };
        }
        StandardEvaluator.evaluate(text, ctx)
    }
}

#[test]
fn custom_evaluator_is_used_for_operands() {
    let assembly = Assembler::new()
        .expect("built-in tables")
        .with_evaluator(Box::new(Answer))
        .assemble("SET A, answer\nSET B, 2\n", "main.dasm");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(
        assembly.image(),
        vec![0x7C01, 42, basic(0x01, 0x01, short(2))]
    );
}

#[test]
fn data_error_survives_resolved_forward_reference() {
    let assembly = assemble(".dat later, \"abc\nlater:\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::IllegalExpression]);
}

#[test]
fn data_reading_location_follows_relaxation() {
    let assembly = assemble("SET A, 1\n.dat $\n");
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1)), 1]);

    let assembly = assemble("SET A, 1\n$:\n.dat $-, $\n");
    assert_eq!(assembly.passes(), Some(1));
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1)), 1, 1]);
}

#[test]
fn named_values_track_label_distances() {
    let assembly = assemble("start: SET A, 1\nend:\n.equ SIZE end-start\n.dat SIZE\n");
    assert_eq!(assembly.error_count(), 0);
    assert_eq!(assembly.symbols.lookup("SIZE"), Some(1));
    assert_eq!(assembly.image(), vec![basic(0x01, 0x00, short(1)), 1]);
    assert_eq!(assembly.passes(), Some(2));

    let assembly = assemble(".dat SIZE\nstart: SET A, 1\nend:\n.equ SIZE end-start\n");
    assert_eq!(assembly.image(), vec![1, basic(0x01, 0x00, short(1))]);
}

#[test]
fn undefined_symbol_is_an_illegal_expression() {
    let assembly = assemble("SET A, nowhere\n");
    assert_eq!(errors(&assembly), vec![ErrorCode::IllegalExpression]);
    assert_eq!(assembly.statements[0].words.len(), 2);
}

#[test]
fn listing_shows_listed_statements_and_symbols() {
    let assembly = assemble("start: SET A, 1\n.nolist\nSET B, 2\n.list\nSET C, 3\n");
    let mut out = Vec::new();
    assembly
        .write_listing(&mut out, "wordforge test")
        .expect("write listing");
    let text = String::from_utf8(out).expect("utf8 listing");
    assert!(text.starts_with("wordforge test"));
    assert!(text.contains("SET A, 1"));
    assert!(!text.contains("SET B, 2"));
    assert!(text.contains("SET C, 3"));
    assert!(text.contains("start"));
}

#[test]
fn run_with_cli_writes_image_and_listings() {
    let dir = create_temp_dir("run-outputs");
    let input = dir.join("prog.dasm");
    let image = dir.join("prog.bin");
    let listing = dir.join("prog.lst");
    let json = dir.join("prog.json");
    write_file(&input, "start: SET A, 0x30\nSET PC, start\n");

    let cli = Cli::parse_from([
        "wordforge",
        input.to_string_lossy().as_ref(),
        "-o",
        image.to_string_lossy().as_ref(),
        "-l",
        listing.to_string_lossy().as_ref(),
        "--json-listing",
        json.to_string_lossy().as_ref(),
    ]);
    with_env_vars(&[], || {
        let report = run_with_cli(&cli).expect("assembly succeeds");
        assert_eq!(report.passes(), 1);
        assert_eq!(report.error_count(), 0);
    });

    let bytes = fs::read(&image).expect("image written");
    assert_eq!(bytes, vec![0x7C, 0x01, 0x00, 0x30, 0x87, 0x81]);
    assert!(fs::read_to_string(&listing)
        .expect("listing written")
        .contains("SET PC, start"));
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&json).expect("json written"))
            .expect("valid json");
    assert_eq!(value["labels"][0]["name"], "start");
}

#[test]
fn run_with_cli_writes_little_endian_image() {
    let dir = create_temp_dir("run-little-endian");
    let input = dir.join("prog.dasm");
    let image = dir.join("prog.bin");
    write_file(&input, "SET A, 0x30\n");

    let cli = Cli::parse_from([
        "wordforge",
        input.to_string_lossy().as_ref(),
        "-o",
        image.to_string_lossy().as_ref(),
        "--little-endian",
    ]);
    with_env_vars(&[], || {
        run_with_cli(&cli).expect("assembly succeeds");
    });
    assert_eq!(fs::read(&image).expect("image"), vec![0x01, 0x7C, 0x30, 0x00]);
}

#[test]
fn run_with_cli_errors_skip_image_but_keep_listing() {
    let dir = create_temp_dir("run-errors");
    let input = dir.join("bad.dasm");
    let image = dir.join("bad.bin");
    let listing = dir.join("bad.lst");
    write_file(&input, "SET A, 1\nBADOP\n");

    let cli = Cli::parse_from([
        "wordforge",
        input.to_string_lossy().as_ref(),
        "-o",
        image.to_string_lossy().as_ref(),
        "-l",
        listing.to_string_lossy().as_ref(),
    ]);
    let err = with_env_result(|| run_with_cli(&cli)).expect_err("assembly fails");
    assert!(err.to_string().contains("Errors detected in source"));
    assert!(err
        .diagnostics()
        .iter()
        .any(|diag| diag.code() == "wf006" && diag.line() == 2));
    assert!(!image.exists());
    assert!(fs::read_to_string(&listing)
        .expect("listing written")
        .contains("BADOP"));
}

#[test]
fn run_with_cli_werror_fails_when_warning_is_emitted() {
    let dir = create_temp_dir("werror-warning");
    let input = dir.join("warn.dasm");
    write_file(&input, "SET A, A\n");

    let cli = Cli::parse_from(["wordforge", input.to_string_lossy().as_ref(), "--Werror"]);
    let err = with_env_result(|| run_with_cli(&cli)).expect_err("warnings are errors");
    assert!(err.to_string().contains("Warnings treated as errors"));
    assert_eq!(err.diagnostics().len(), 1);
    assert_eq!(err.diagnostics()[0].severity(), Severity::Error);
    assert_eq!(err.diagnostics()[0].code(), "wf101");

    let cli = Cli::parse_from(["wordforge", input.to_string_lossy().as_ref()]);
    let report = with_env_result(|| run_with_cli(&cli)).expect("warnings allowed");
    assert_eq!(report.warning_count(), 1);
}

#[test]
fn run_with_cli_honours_macro_depth() {
    let dir = create_temp_dir("run-macro-depth");
    let input = dir.join("deep.dasm");
    write_file(
        &input,
        ".macro one() {\nSET A, 1\n}\n.macro two() {\none()\n}\ntwo()\n",
    );

    let cli = Cli::parse_from([
        "wordforge",
        input.to_string_lossy().as_ref(),
        "--macro-depth",
        "1",
    ]);
    let err = with_env_result(|| run_with_cli(&cli)).expect_err("too deep");
    assert!(err.diagnostics().iter().any(|diag| diag.code() == "wf009"));

    let cli = Cli::parse_from([
        "wordforge",
        input.to_string_lossy().as_ref(),
        "--macro-depth",
        "2",
    ]);
    assert!(with_env_result(|| run_with_cli(&cli)).is_ok());
}

fn with_env_result<T>(run: impl FnOnce() -> T) -> T {
    let mut result = None;
    with_env_vars(&[], || result = Some(run()));
    result.expect("closure ran")
}

fn label_program(targets: &[usize]) -> String {
    targets
        .iter()
        .enumerate()
        .map(|(idx, target)| format!("l{idx}: SET A, l{target}\n"))
        .collect()
}

proptest! {
    #[test]
    fn small_literals_fold_into_one_word(value in 0u16..=30) {
        let assembly = assemble(&format!("SET A, {value}\n"));
        prop_assert_eq!(assembly.image(), vec![basic(0x01, 0x00, value + 0x21)]);
    }

    #[test]
    fn larger_literals_take_a_next_word(value in 31u16..0xFFFF) {
        let assembly = assemble(&format!("SET A, {value}\n"));
        prop_assert_eq!(assembly.image(), vec![0x7C01, value]);
    }

    #[test]
    fn label_programs_settle_and_stay_settled(
        targets in prop::collection::vec(0usize..24, 1..24)
    ) {
        let targets: Vec<usize> = targets.iter().map(|t| t % targets.len()).collect();
        let mut assembly = assemble(&label_program(&targets));
        prop_assert_eq!(assembly.error_count(), 0);
        prop_assert!(assembly.passes().is_some());

        // Every label sits where the words before it end.
        let mut address = 0u16;
        for stmt in assembly.statements.iter().filter(|s| s.is_instruction()) {
            prop_assert_eq!(stmt.address, address);
            address += stmt.word_count();
        }
        for (idx, target) in targets.iter().enumerate() {
            let value = assembly.symbols.lookup(&format!("l{target}")).expect("label");
            let stmt = assembly
                .statements
                .iter()
                .filter(|s| s.is_instruction())
                .nth(idx)
                .expect("instruction");
            prop_assert_eq!(stmt.words.len(), if value <= 30 { 1 } else { 2 });
        }

        let image = assembly.image();
        let again = relax(&mut assembly.statements, &mut assembly.symbols, &StandardEvaluator);
        prop_assert_eq!(again, Ok(1));
        prop_assert_eq!(assembly.image(), image);
    }
}
