// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler run orchestration.
//!
//! This module owns the CLI-driven run flow: table loading, assembly of the
//! input file and writing of the requested outputs.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use clap::Parser;
use log::debug;

use super::cli::{validate_cli, Cli, CliConfig};
use super::output::{write_image, write_json_listing};
use super::*;

/// Run the assembler with command-line arguments.
pub(super) fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = Cli::parse();
    run_with_cli(&cli)
}

pub(super) fn run_with_cli(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let config = validate_cli(cli)?;
    let report = run_one(&config)?;

    if config.warning_policy.treat_warnings_as_errors {
        let warning_diags: Vec<Diagnostic> = report
            .diagnostics()
            .iter()
            .filter(|diag| diag.severity == Severity::Warning)
            .map(|diag| {
                let mut warning = diag.clone();
                warning.severity = Severity::Error;
                warning
            })
            .collect();
        if !warning_diags.is_empty() {
            return Err(AsmRunError::new(
                AsmError::new(
                    AsmErrorKind::Assembler,
                    "Warnings treated as errors (-Werror)",
                    None,
                ),
                warning_diags,
            ));
        }
    }

    Ok(report)
}

fn load_tables(config: &CliConfig) -> Result<OperandTables, AsmRunError> {
    let loaded = match &config.table_path {
        Some(path) => OperandTables::load(path),
        None => OperandTables::dcpu16(),
    };
    loaded.map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Table,
                "Cannot load operand table",
                Some(&err.to_string()),
            ),
            Vec::new(),
        )
    })
}

fn create_output(path: &Path) -> Result<BufWriter<File>, AsmRunError> {
    File::create(path).map(BufWriter::new).map_err(|_| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                "Error opening file for write",
                Some(&path.display().to_string()),
            ),
            Vec::new(),
        )
    })
}

fn run_one(config: &CliConfig) -> Result<AsmRunReport, AsmRunError> {
    let tables = load_tables(config)?;
    debug!("operand table version {}", tables.version());
    let assembler = Assembler::with_tables(tables)
        .with_include_paths(config.include_paths.iter().cloned())
        .with_macro_depth(config.macro_depth);
    let assembly = assembler.assemble_file(&config.input_path)?;

    if let Some(path) = &config.listing_path {
        let title = format!("wordforge {VERSION}  {}", config.input_path.display());
        assembly.write_listing(create_output(path)?, &title)?;
    }
    if let Some(path) = &config.json_listing_path {
        write_json_listing(create_output(path)?, &assembly)?;
    }

    if assembly.error_count() > 0 {
        return Err(AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Assembler,
                "Errors detected in source. No image file created.",
                None,
            ),
            assembly.diagnostics(),
        ));
    }

    if let Some(path) = &config.output_path {
        let image = assembly.image();
        write_image(create_output(path)?, &image, config.endianness)?;
        debug!("wrote {} word(s) to {}", image.len(), path.display());
    }

    Ok(assembly.report())
}
