// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::env;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};

use crate::core::assembler::error::{AsmError, AsmErrorKind, AsmRunError};

use super::output::Endianness;
use super::DEFAULT_MACRO_DEPTH;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Macro assembler for the DCPU-16 16-bit word-addressed CPU.

Short literals (-1 and 0..30) are folded into the instruction word; the
assembler relaxes instruction sizes until every label address is stable.
Outputs are opt-in: -o writes the binary image, -l a text listing and
--json-listing a machine-readable listing. Without outputs the source is
only checked and diagnostics are reported.";

#[derive(Parser, Debug)]
#[command(
    name = "wordforge",
    version = VERSION,
    about = "DCPU-16 macro assembler with includes, relocation tables and short-literal relaxation",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "INPUT",
        long_help = "Assembly source file to assemble."
    )]
    pub input: PathBuf,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        long_help = "Write the assembled image to FILE as raw 16-bit words (big-endian unless --little-endian)."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        short = 'l',
        long = "listing",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a listing file. FILE is optional; when omitted, the input name with a .lst extension is used."
    )]
    pub listing: Option<String>,
    #[arg(
        long = "json-listing",
        value_name = "FILE",
        long_help = "Write the statement listing and symbol table to FILE as JSON."
    )]
    pub json_listing: Option<PathBuf>,
    #[arg(
        short = 'I',
        long = "include-path",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Add a search directory for <path> includes (repeatable). Several directories may be given separated by ';'."
    )]
    pub include_paths: Vec<String>,
    #[arg(
        long = "table",
        value_name = "FILE",
        long_help = "Load opcode and operand patterns from FILE instead of the built-in DCPU-16 table."
    )]
    pub table: Option<PathBuf>,
    #[arg(
        long = "little-endian",
        action = ArgAction::SetTrue,
        long_help = "Write image words low byte first."
    )]
    pub little_endian: bool,
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select diagnostic output format. text is default; json prints one JSON object per diagnostic."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress the summary line for successful runs. Errors are still reported."
    )]
    pub quiet: bool,
    #[arg(
        short = 'w',
        long = "no-warn",
        action = ArgAction::SetTrue,
        conflicts_with = "warn_error",
        long_help = "Suppress warning diagnostics."
    )]
    pub no_warn: bool,
    #[arg(
        long = "Werror",
        action = ArgAction::SetTrue,
        long_help = "Treat warnings as errors (non-zero exit status)."
    )]
    pub warn_error: bool,
    #[arg(
        long = "macro-depth",
        value_name = "N",
        long_help = "Maximum nesting of macro expansions before an invocation is rejected. Defaults to 64."
    )]
    pub macro_depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WarningPolicy {
    pub emit_warnings: bool,
    pub treat_warnings_as_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Path for an optional output: an empty name derives it from `input`.
pub fn resolve_output_path(input: &Path, name: Option<&str>, extension: &str) -> Option<PathBuf> {
    match name {
        Some("") => Some(input.with_extension(extension)),
        Some(name) => Some(PathBuf::from(name)),
        None => None,
    }
}

fn cli_error(message: impl Into<String>) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Cli, &message.into(), None),
        Vec::new(),
    )
}

fn parse_env_bool(var_name: &str) -> Result<Option<bool>, AsmRunError> {
    let Some(raw) = env::var_os(var_name) else {
        return Ok(None);
    };
    let value = raw.to_string_lossy().trim().to_ascii_lowercase();
    let parsed = match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        _ => {
            return Err(cli_error(format!(
                "Invalid boolean value for {var_name}: {value}"
            )))
        }
    };
    Ok(parsed)
}

fn parse_env_path(var_name: &str) -> Result<Option<PathBuf>, AsmRunError> {
    let Some(raw) = env::var_os(var_name) else {
        return Ok(None);
    };
    let value = raw.to_string_lossy().trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(value)))
}

/// Include directories from a `;`-separated variable.
fn parse_env_path_list(var_name: &str) -> Result<Vec<PathBuf>, AsmRunError> {
    let Some(raw) = env::var_os(var_name) else {
        return Ok(Vec::new());
    };
    Ok(split_path_list(&raw.to_string_lossy()))
}

fn parse_env_usize(var_name: &str) -> Result<Option<usize>, AsmRunError> {
    let Some(raw) = env::var_os(var_name) else {
        return Ok(None);
    };
    let value = raw.to_string_lossy().trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| cli_error(format!("Invalid integer value for {var_name}: {value}")))
}

fn split_path_list(text: &str) -> Vec<PathBuf> {
    text.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Validate CLI arguments and return parsed configuration.
pub fn validate_cli(cli: &Cli) -> Result<CliConfig, AsmRunError> {
    let env_include_paths = parse_env_path_list("WORDFORGE_INCLUDE_PATHS")?;
    let env_table = parse_env_path("WORDFORGE_TABLE")?;
    let env_quiet = parse_env_bool("WORDFORGE_QUIET")?;
    let env_no_warn = parse_env_bool("WORDFORGE_NO_WARN")?;
    let env_warn_error = parse_env_bool("WORDFORGE_WERROR")?;
    let env_macro_depth = parse_env_usize("WORDFORGE_MACRO_DEPTH")?;

    if !cli.input.is_file() {
        return Err(cli_error(format!(
            "Input file not found: {}",
            cli.input.display()
        )));
    }

    let mut include_paths = env_include_paths;
    for entry in &cli.include_paths {
        include_paths.extend(split_path_list(entry));
    }

    let quiet = cli.quiet || env_quiet.unwrap_or(false);

    let no_warn = if cli.no_warn {
        true
    } else if cli.warn_error {
        false
    } else {
        env_no_warn.unwrap_or(false)
    };

    let warn_error = if cli.warn_error {
        true
    } else if no_warn {
        false
    } else {
        env_warn_error.unwrap_or(false)
    };

    let macro_depth = cli
        .macro_depth
        .or(env_macro_depth)
        .unwrap_or(DEFAULT_MACRO_DEPTH);
    if macro_depth == 0 {
        return Err(cli_error("--macro-depth must be at least 1"));
    }

    let listing_path = resolve_output_path(&cli.input, cli.listing.as_deref(), "lst");
    if listing_path.is_some() && listing_path == cli.output {
        return Err(cli_error("Listing and image output must be different files"));
    }

    Ok(CliConfig {
        input_path: cli.input.clone(),
        output_path: cli.output.clone(),
        listing_path,
        json_listing_path: cli.json_listing.clone(),
        include_paths,
        table_path: cli.table.clone().or(env_table),
        endianness: if cli.little_endian {
            Endianness::Little
        } else {
            Endianness::Big
        },
        output_format: cli.format,
        quiet,
        warning_policy: WarningPolicy {
            emit_warnings: !no_warn,
            treat_warnings_as_errors: warn_error,
        },
        macro_depth,
    })
}

/// Validated CLI configuration.
#[derive(Debug)]
pub struct CliConfig {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub listing_path: Option<PathBuf>,
    pub json_listing_path: Option<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub table_path: Option<PathBuf>,
    pub endianness: Endianness,
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub warning_policy: WarningPolicy,
    pub macro_depth: usize,
}
