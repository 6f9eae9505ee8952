//! Command execution environment the shell tools run against.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::io::config::SandboxConfig;
use crate::io::process::{Limits, run_bounded};

/// Result of one shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
    /// Stdout hit the capture limit; `stdout` is incomplete.
    pub stdout_truncated: bool,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr under a marker when stderr is non-empty.
    pub fn combined(&self) -> String {
        if self.stderr.trim().is_empty() {
            return self.stdout.clone();
        }
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(&self.stderr);
        text
    }
}

/// Abstraction over where shell commands run.
pub trait Sandbox: Send + Sync {
    fn execute(&self, command: &str) -> Result<ShellOutput>;
}

/// Runs commands with a local shell inside one working directory.
#[derive(Debug, Clone)]
pub struct LocalShell {
    pub shell: String,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl LocalShell {
    pub fn from_config(cfg: &SandboxConfig, workdir: PathBuf) -> Self {
        Self {
            shell: cfg.shell.clone(),
            workdir,
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl Sandbox for LocalShell {
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    fn execute(&self, command: &str) -> Result<ShellOutput> {
        debug!(command = %preview(command), "executing");
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command).current_dir(&self.workdir);
        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, None, limits)
            .with_context(|| format!("run {} in {}", self.shell, self.workdir.display()))?;

        let mut stderr = output.stderr.text("stderr");
        if output.timed_out {
            stderr.push_str(&format!(
                "\n[command timed out after {}s]\n",
                self.timeout.as_secs()
            ));
        }
        Ok(ShellOutput {
            stdout: output.stdout.text("stdout"),
            stderr,
            exit_code: output.exit_code(),
            stdout_truncated: output.stdout.dropped > 0,
        })
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(dir: &std::path::Path) -> LocalShell {
        LocalShell {
            shell: "bash".to_string(),
            workdir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn runs_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let out = shell(temp.path()).execute("ls").expect("execute");
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn capped_stdout_is_flagged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut sh = shell(temp.path());
        sh.output_limit_bytes = 8;
        let out = sh.execute("printf '0123456789abcdef'").expect("execute");
        assert!(out.stdout_truncated);
        assert!(out.stdout.starts_with("01234567"));

        let out = shell(temp.path()).execute("echo short").expect("execute");
        assert!(!out.stdout_truncated);
    }

    #[test]
    fn nonzero_exit_is_reported_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = shell(temp.path())
            .execute("echo boom >&2; exit 4")
            .expect("execute");
        assert_eq!(out.exit_code, Some(4));
        assert_eq!(out.combined(), "[stderr]\nboom\n");
    }
}
