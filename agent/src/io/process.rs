//! Child processes with a wall-clock timeout and bounded captured output.
//!
//! Both the command model backend and the local shell sandbox go through
//! [`run_bounded`], so a runaway tool and a hung model CLI are cut off the
//! same way.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_bytes: usize,
}

/// One captured stream.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: u64,
}

impl Captured {
    /// Lossy text, with a notice appended when bytes were dropped.
    pub fn text(&self, label: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n[{label} truncated {} bytes]\n", self.dropped));
        }
        text
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Exit code, or `None` when the process was killed.
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            None
        } else {
            self.status.code()
        }
    }
}

/// Run `cmd`, optionally feeding `input` on stdin, and kill it after `limits.timeout`.
///
/// Readers and the stdin writer run on their own threads so neither side can
/// block the other on a full pipe.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, input: Option<&[u8]>, limits: Limits) -> Result<ProcessOutput> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout = thread::spawn(move || capture(stdout, limits.output_bytes));
    let stderr = thread::spawn(move || capture(stderr, limits.output_bytes));

    let writer = match (input, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(thread::spawn(move || match pipe.write_all(&input) {
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("child closed stdin early");
                    Ok(())
                }
                other => other,
            }))
        }
        _ => None,
    };

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!("command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait after kill")?, true)
        }
    };

    if let Some(writer) = writer {
        joined(writer, "stdin writer")?.context("write stdin")?;
    }
    let stdout = joined(stdout, "stdout reader")?.context("read stdout")?;
    let stderr = joined(stderr, "stderr reader")?.context("read stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        debug!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output truncated");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn capture<R: Read>(mut reader: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(limit as u64)
        .read_to_end(&mut bytes)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    Ok(Captured { bytes, dropped })
}

fn joined<T>(handle: JoinHandle<T>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{what} thread panicked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout: Duration, output_bytes: usize) -> Limits {
        Limits {
            timeout,
            output_bytes,
        }
    }

    #[test]
    fn separates_streams_and_keeps_exit_code() {
        let out = run_bounded(
            sh("echo out; echo err 1>&2; exit 3"),
            None,
            limits(Duration::from_secs(10), 1024),
        )
        .expect("run");
        assert_eq!(out.exit_code(), Some(3));
        assert_eq!(out.stdout.text("stdout"), "out\n");
        assert_eq!(out.stderr.text("stderr"), "err\n");
    }

    #[test]
    fn large_input_round_trips_through_cat() {
        let input = "line\n".repeat(50_000);
        let out = run_bounded(
            sh("cat"),
            Some(input.as_bytes()),
            limits(Duration::from_secs(10), 1 << 20),
        )
        .expect("run");
        assert_eq!(out.stdout.bytes.len(), input.len());
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let input = vec![b'x'; 1 << 20];
        let out = run_bounded(sh("exit 0"), Some(&input), limits(Duration::from_secs(10), 64))
            .expect("run");
        assert_eq!(out.exit_code(), Some(0));
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let out = run_bounded(
            sh("printf 'abcdefghij'"),
            None,
            limits(Duration::from_secs(10), 4),
        )
        .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert!(out.stdout.text("stdout").ends_with("[stdout truncated 6 bytes]\n"));
    }

    #[test]
    fn timeout_kills_and_clears_exit_code() {
        let out = run_bounded(sh("sleep 5"), None, limits(Duration::from_millis(100), 64))
            .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_code(), None);
    }
}
