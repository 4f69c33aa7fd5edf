use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Result of one `wordforge` invocation.
pub struct CliRun {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CliRun {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Lines of stderr parsed as JSON diagnostics; other lines are skipped.
    pub fn json_diagnostics(&self) -> Vec<serde_json::Value> {
        self.stderr
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl From<Output> for CliRun {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run the binary in `dir` with `args` and a clean `WORDFORGE_*` environment.
pub fn run_wordforge(dir: &Path, args: &[&str]) -> CliRun {
    let mut command = Command::new(wordforge_binary_path());
    command.current_dir(dir).args(args).env("NO_COLOR", "1");
    for key in [
        "WORDFORGE_INCLUDE_PATHS",
        "WORDFORGE_TABLE",
        "WORDFORGE_QUIET",
        "WORDFORGE_NO_WARN",
        "WORDFORGE_WERROR",
        "WORDFORGE_MACRO_DEPTH",
    ] {
        command.env_remove(key);
    }
    command.output().expect("spawn wordforge").into()
}

fn wordforge_binary_path() -> PathBuf {
    option_env!("CARGO_BIN_EXE_wordforge")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target/debug/wordforge"))
}
