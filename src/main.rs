// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for wordforge.

use std::io::{self, IsTerminal, Write};

use clap::Parser;
use serde_json::json;

use wordforge::assembler::cli::{validate_cli, Cli, OutputFormat};
use wordforge::core::assembler::error::{Diagnostic, Severity};

struct DiagnosticsSink {
    writer: Box<dyn Write>,
    format: OutputFormat,
    use_color: bool,
    emit_warnings: bool,
}

impl DiagnosticsSink {
    fn stderr(format: OutputFormat, emit_warnings: bool) -> Self {
        let use_color = std::env::var("NO_COLOR").is_err() && io::stderr().is_terminal();
        Self {
            writer: Box::new(io::stderr()),
            format,
            use_color,
            emit_warnings,
        }
    }

    fn emit_line(&mut self, line: &str) {
        let _ = writeln!(self.writer, "{line}");
    }

    fn emit_diagnostics(&mut self, diagnostics: &[Diagnostic]) {
        for diag in diagnostics {
            if !self.emit_warnings && diag.severity() == Severity::Warning {
                continue;
            }
            let line = format_diagnostic_line(diag, self.use_color, self.format);
            self.emit_line(&line);
        }
    }
}

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(diag: &Diagnostic, use_color: bool, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        json!({
            "code": diag.code(),
            "severity": severity_to_str(diag.severity()),
            "message": diag.message(),
            "file": diag.file(),
            "line": diag.line(),
            "source": diag.source(),
            "notes": diag.notes(),
            "help": diag.help(),
        })
        .to_string()
    } else {
        diag.format_with_context(None, use_color)
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let cli_config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    let mut sink = DiagnosticsSink::stderr(
        cli_config.output_format,
        cli_config.warning_policy.emit_warnings,
    );

    match wordforge::assembler::run_with_cli(&cli) {
        Ok(report) => {
            sink.emit_diagnostics(report.diagnostics());
            if !cli_config.quiet && cli_config.output_format == OutputFormat::Text {
                sink.emit_line(&format!(
                    "{}: {} warning(s), settled after {} pass(es)",
                    cli_config.input_path.display(),
                    report.warning_count(),
                    report.passes()
                ));
            }
        }
        Err(err) => {
            sink.emit_diagnostics(err.diagnostics());
            if cli_config.output_format != OutputFormat::Json {
                sink.emit_line(&err.to_string());
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordforge::core::assembler::error::{AsmError, AsmErrorKind};

    #[test]
    fn format_diagnostic_line_json_has_expected_keys_with_nulls() {
        let diag = Diagnostic::new(
            7,
            Severity::Error,
            AsmError::new(AsmErrorKind::Assembler, "boom", None),
        )
        .with_code("wf999");
        let line = format_diagnostic_line(&diag, false, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(value["code"], "wf999");
        assert_eq!(value["severity"], "error");
        assert_eq!(value["message"], "boom");
        assert_eq!(value["line"], 7);
        assert!(value["file"].is_null());
        assert!(value["source"].is_null());
        assert!(value["notes"].is_array());
        assert!(value["help"].is_array());
    }

    #[test]
    fn format_diagnostic_line_text_uses_source_context() {
        let diag = Diagnostic::new(
            2,
            Severity::Warning,
            AsmError::new(AsmErrorKind::Instruction, "Redundant statement", None),
        )
        .with_code("wf101")
        .with_file(Some("prog.dasm".to_string()))
        .with_source(Some("SET A, A".to_string()));
        let text = format_diagnostic_line(&diag, false, OutputFormat::Text);
        assert!(text.starts_with("prog.dasm:2: WARNING [wf101]"));
        assert!(text.contains("    2 | SET A, A"));
    }
}
