//! Repository tools that run through a [`Sandbox`].
//!
//! Every command is built as a single shell string; file paths and patterns are
//! quoted with `shell-words` so model-supplied text never splits into extra words.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shell_words::quote;
use tracing::debug;

use super::{Param, Tool, ToolArgs, ToolContext, ToolSpec};
use crate::core::edit::splice_lines;
use crate::io::sandbox::Sandbox;

/// Keeps each `bash -c` argument well under the kernel's single-argument limit.
const WRITE_CHUNK_BYTES: usize = 64 * 1024;

const STAGE_AND_DIFF_CMD: &str = "git add -A && git diff --cached";

const COMMON_TEST_COMMANDS: &[&str] = &[
    "pytest -q || true",
    "python -m pytest -q || true",
    "tox -q || true",
    "python runtests.py -q || true",
    "python setup.py test || true",
];

/// Always-on command tool.
pub fn required_tools(sandbox: &Arc<dyn Sandbox>) -> Vec<Box<dyn Tool>> {
    vec![Box::new(RunBashCmd(sandbox.clone()))]
}

/// File inspection, editing and verification helpers.
pub fn optional_tools(sandbox: &Arc<dyn Sandbox>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ReplaceInFile(sandbox.clone())),
        Box::new(ShowFile(sandbox.clone())),
        Box::new(StageAndDiff(sandbox.clone())),
        Box::new(ShowFileRange(sandbox.clone())),
        Box::new(GrepRepo(sandbox.clone())),
        Box::new(RunCommonTests(sandbox.clone())),
        Box::new(SyntaxCheck(sandbox.clone())),
    ]
}

/// Run `command` and return its combined output; a non-zero exit is an error
/// carrying that output.
fn run_checked(sandbox: &dyn Sandbox, command: &str) -> Result<String> {
    let output = sandbox.execute(command)?;
    if !output.success() {
        let code = output
            .exit_code
            .map_or_else(|| "killed".to_string(), |code| code.to_string());
        bail!("exit status {code}\n{}", output.combined());
    }
    Ok(output.combined())
}

/// Run `command` and return its output whatever the exit status.
fn run_lenient(sandbox: &dyn Sandbox, command: &str) -> String {
    match sandbox.execute(command) {
        Ok(output) => output.combined(),
        Err(err) => format!("{err:#}"),
    }
}

fn line_range(args: &ToolArgs) -> Result<(usize, usize)> {
    let (Ok(from), Ok(to)) = (args.require_int("from_line"), args.require_int("to_line")) else {
        bail!("from_line/to_line must be integers");
    };
    if from < 1 || to < from {
        bail!("Invalid line range");
    }
    Ok((from as usize, to as usize))
}

pub struct RunBashCmd(pub Arc<dyn Sandbox>);

impl Tool for RunBashCmd {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "run_bash_cmd",
            vec![Param::str("command")],
            "Run the command in a bash shell and return the output or fail
if the process returns non-zero exit code.

Args:
    command (str): the shell command to run

Returns:
    The output of running the shell command",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let command = args.require("command")?;
        if command.trim().is_empty() {
            bail!("Empty command");
        }
        run_checked(self.0.as_ref(), command)
    }
}

pub struct ShowFile(pub Arc<dyn Sandbox>);

impl Tool for ShowFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "show_file",
            vec![Param::str("file_path")],
            "Show the content of the file with line numbers.",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let path = args.require("file_path")?.trim();
        run_checked(self.0.as_ref(), &format!("cat -n {}", quote(path)))
    }
}

pub struct ShowFileRange(pub Arc<dyn Sandbox>);

impl Tool for ShowFileRange {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "show_file_range",
            vec![
                Param::str("file_path"),
                Param::int("from_line"),
                Param::int("to_line"),
            ],
            "Show a line range from a file (inclusive), with line numbers.",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let path = args.require("file_path")?.trim();
        let (from, to) = line_range(args)?;
        run_checked(
            self.0.as_ref(),
            &format!("sed -n '{from},{to}p' {} | nl -ba -v {from}", quote(path)),
        )
    }
}

pub struct ReplaceInFile(pub Arc<dyn Sandbox>);

impl Tool for ReplaceInFile {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "replace_in_file",
            vec![
                Param::str("file_path"),
                Param::int("from_line"),
                Param::int("to_line"),
                Param::str("content"),
            ],
            "Replace the content of the file from the given line to the given line
(1-based, inclusive) with the given content. The block is re-indented to match
the lines it replaces.",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let path = args.require("file_path")?.trim();
        let (from, to) = line_range(args)?;
        let content = args.require("content")?;

        let sandbox = self.0.as_ref();
        let original = sandbox.execute(&format!("cat -- {}", quote(path)))?;
        if !original.success() {
            return Err(anyhow!("read {path}: {}", original.stderr.trim()));
        }
        if original.stdout_truncated {
            bail!("read {path}: file exceeds the sandbox output limit; edit not applied");
        }
        let line_count = original.stdout.lines().count();
        let updated = splice_lines(&original.stdout, from, to, content);
        write_file(sandbox, path, &updated)?;

        if from > line_count {
            let added = updated.lines().count().saturating_sub(line_count);
            debug!(path, line_count, added, "appended lines");
            if added == 0 {
                return Ok(format!("No lines appended to {path}"));
            }
            return Ok(format!(
                "Appended lines {}-{} to {path}",
                line_count + 1,
                line_count + added
            ));
        }
        let end = to.min(line_count);
        debug!(path, from, end, "replaced lines");
        Ok(format!("Replaced lines {from}-{end} in {path}"))
    }
}

/// Write `contents` to `path` through the sandbox via a base64 staging file.
fn write_file(sandbox: &dyn Sandbox, path: &str, contents: &str) -> Result<()> {
    let encoded = STANDARD.encode(contents.as_bytes());
    let staging = quote(&format!("{path}.b64.tmp")).into_owned();
    run_checked(sandbox, &format!(": > {staging}"))?;
    // Base64 output is pure ASCII, so byte chunking never splits a character.
    for chunk in encoded.as_bytes().chunks(WRITE_CHUNK_BYTES) {
        let chunk = std::str::from_utf8(chunk)?;
        run_checked(sandbox, &format!("printf '%s' '{chunk}' >> {staging}"))?;
    }
    run_checked(
        sandbox,
        &format!(
            "base64 -d {staging} > {} && rm -f {staging}",
            quote(path)
        ),
    )?;
    Ok(())
}

pub struct GrepRepo(pub Arc<dyn Sandbox>);

impl Tool for GrepRepo {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "grep_repo",
            vec![Param::str("pattern")],
            "Search recursively for a fixed string in the repository, excluding .git.
Returns filename:line:match lines.",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let pattern = args.require("pattern")?;
        if pattern.is_empty() {
            bail!("pattern must be a non-empty string");
        }
        run_checked(
            self.0.as_ref(),
            &format!(
                "grep -RInF --exclude-dir=.git -- {} . || true",
                quote(pattern)
            ),
        )
    }
}

pub struct StageAndDiff(pub Arc<dyn Sandbox>);

impl Tool for StageAndDiff {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "stage_and_diff",
            vec![],
            "Stage all changes and return the current cached diff.

Returns a unified diff string (may be empty if no changes staged).",
        )
    }

    fn call(&self, _args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        run_checked(self.0.as_ref(), STAGE_AND_DIFF_CMD)
            .map_err(|err| anyhow!("stage_and_diff failed: {err:#}"))
    }
}

pub struct RunCommonTests(pub Arc<dyn Sandbox>);

impl Tool for RunCommonTests {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "run_common_tests",
            vec![],
            "Try a sequence of common test commands; return their outputs.
Does not fail when tests fail; returns accumulated logs.",
        )
    }

    fn call(&self, _args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        let logs: Vec<String> = COMMON_TEST_COMMANDS
            .iter()
            .map(|command| format!("$ {command}\n{}", run_lenient(self.0.as_ref(), command)))
            .collect();
        Ok(logs.join("\n\n"))
    }
}

pub struct SyntaxCheck(pub Arc<dyn Sandbox>);

impl Tool for SyntaxCheck {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "syntax_check",
            vec![],
            "Quickly check Python syntax across the repository.
Runs compileall and returns its output without failing.",
        )
    }

    fn call(&self, _args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        Ok(run_lenient(
            self.0.as_ref(),
            "python -m compileall -q . || true",
        ))
    }
}

/// Stage everything and return the patch for a finished run.
///
/// Falls back to `result` with a note when the diff is empty or git fails.
pub fn collect_patch(sandbox: &dyn Sandbox, result: &str) -> String {
    match sandbox.execute(STAGE_AND_DIFF_CMD) {
        Ok(output) if output.success() && !output.stdout.trim().is_empty() => output.stdout,
        Ok(output) if output.success() => {
            format!("{result}\n\nNo changes detected to generate a patch.")
        }
        Ok(output) => format!(
            "{result}\n\nError running git commands: {}",
            output.combined().trim()
        ),
        Err(err) => format!("{result}\n\nError running git commands: {err:#}"),
    }
}
