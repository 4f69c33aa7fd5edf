// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output writers for the binary image and the JSON listing.

use std::io::{self, Write};

use serde_json::{json, Value};

use crate::core::statement::{Statement, StatementKind};

use super::Assembly;

/// Byte order of image words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

pub fn image_bytes(words: &[u16], endianness: Endianness) -> Vec<u8> {
    words
        .iter()
        .flat_map(|word| match endianness {
            Endianness::Big => word.to_be_bytes(),
            Endianness::Little => word.to_le_bytes(),
        })
        .collect()
}

pub fn write_image<W: Write>(mut out: W, words: &[u16], endianness: Endianness) -> io::Result<()> {
    out.write_all(&image_bytes(words, endianness))?;
    out.flush()
}

fn kind_name(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::Label => "label",
        StatementKind::Directive => "directive",
        StatementKind::BasicInstruction => "basic",
        StatementKind::NonBasicInstruction => "non_basic",
    }
}

fn statement_json(stmt: &Statement) -> Value {
    json!({
        "file": stmt.file,
        "line": stmt.line,
        "root_line": stmt.root_line,
        "address": stmt.address,
        "kind": kind_name(stmt.kind),
        "code": stmt.code,
        "words": stmt.words,
        "error": stmt.error.map(|e| e.code()),
        "warning": stmt.warning.map(|w| w.code()),
    })
}

/// Statements, labels and named values of an assembly as one JSON document.
pub fn listing_json(assembly: &Assembly) -> Value {
    let statements: Vec<Value> = assembly
        .statements
        .iter()
        .filter(|s| s.listed)
        .map(statement_json)
        .collect();
    let labels: Vec<Value> = assembly
        .symbols
        .labels()
        .iter()
        .map(|label| {
            json!({
                "name": label.name,
                "address": label.address,
                "line": label.line,
                "relocation_group": label.relocation_group,
            })
        })
        .collect();
    let values: Vec<Value> = assembly
        .symbols
        .values()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({
        "passes": assembly.passes(),
        "errors": assembly.error_count(),
        "warnings": assembly.warning_count(),
        "statements": statements,
        "labels": labels,
        "values": values,
    })
}

pub fn write_json_listing<W: Write>(mut out: W, assembly: &Assembly) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut out, &listing_json(assembly))?;
    writeln!(out)
}
