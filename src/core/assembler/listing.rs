// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.

use std::io::Write;

use crate::core::statement::Statement;
use crate::core::symbol_table::SymbolTable;

use super::error::PassCounts;

/// Words shown per listing row; longer statements continue on extra rows.
const WORDS_PER_ROW: usize = 4;

/// Data for a single listing line.
pub struct ListingLine<'a> {
    pub addr: u16,
    pub words: &'a [u16],
    pub line_num: u32,
    pub source: &'a str,
    pub marker: Option<&'a str>,
}

impl<'a> ListingLine<'a> {
    pub fn from_statement(stmt: &'a Statement) -> Self {
        let marker = stmt
            .error
            .map(|e| e.code())
            .or_else(|| stmt.warning.map(|w| w.code()));
        Self {
            addr: stmt.address,
            words: &stmt.words,
            line_num: stmt.line,
            source: &stmt.code,
            marker,
        }
    }
}

/// Writer for listing file output.
pub struct ListingWriter<W: Write> {
    out: W,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self, title: &str) -> std::io::Result<()> {
        writeln!(self.out, "{title}")?;
        writeln!(self.out, "ADDR  WORDS                LINE  SOURCE")?;
        writeln!(self.out, "----  -------------------  ----  ------")?;
        Ok(())
    }

    pub fn write_line(&mut self, line: ListingLine<'_>) -> std::io::Result<()> {
        let marker = line
            .marker
            .map(|code| format!("  ; {code}"))
            .unwrap_or_default();
        let mut rows = line.words.chunks(WORDS_PER_ROW);
        let first = rows.next().unwrap_or(&[]);
        let loc = if first.is_empty() {
            "----".to_string()
        } else {
            format!("{:04X}", line.addr)
        };
        writeln!(
            self.out,
            "{:<4}  {:<19}  {:>4}  {}{}",
            loc,
            format_words(first),
            line.line_num,
            line.source,
            marker
        )?;
        let mut addr = line.addr.wrapping_add(first.len() as u16);
        for row in rows {
            writeln!(self.out, "{:04X}  {}", addr, format_words(row))?;
            addr = addr.wrapping_add(row.len() as u16);
        }
        Ok(())
    }

    pub fn footer(&mut self, counts: &PassCounts, symbols: &SymbolTable) -> std::io::Result<()> {
        writeln!(
            self.out,
            "\nLines: {}  Errors: {}  Warnings: {}",
            counts.lines, counts.errors, counts.warnings
        )?;
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        symbols.dump(&mut self.out)?;
        Ok(())
    }
}

/// Format words as a hex string for listing.
pub fn format_words(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| format!("{:04X}", w))
        .collect::<Vec<_>>()
        .join(" ")
}
