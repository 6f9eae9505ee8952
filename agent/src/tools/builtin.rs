//! Tools owned by the agent itself: termination and backtracking.

use anyhow::{Context, Result};

use super::{Param, Tool, ToolArgs, ToolContext, ToolSpec};
use crate::core::history::HistoryError;

pub const FINISH: &str = "finish";
pub const BACKTRACK: &str = "add_instructions_and_backtrack";

/// Terminating action; its output is the run's result.
pub struct Finish;

impl Tool for Finish {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            FINISH,
            vec![Param::str("result")],
            "End the run and return the final summary/result string.

This function does not stage or generate diffs. Before calling it, stage changes
with \"git add -A\" and verify a non-empty staged diff using the \"stage_and_diff\"
tool. The harness collects the staged patch after completion.

Args:
    result (str): Brief summary of the fix or rationale.

Returns:
    str: The same result string, which the run returns.",
        )
    }

    fn call(&self, args: &ToolArgs, _ctx: &mut ToolContext<'_>) -> Result<String> {
        Ok(args.require("result")?.to_string())
    }
}

/// Rewrites the instructor node and moves the history cursor.
pub struct Backtrack;

impl Tool for Backtrack {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            BACKTRACK,
            vec![Param::str("instructions"), Param::int("at_message_id")],
            "Call this if you are making too many mistakes or are stuck.

Replaces the content of the instruction node with 'instructions' and backtracks
to the message with id 'at_message_id'. Backtracking moves the current message
pointer to that message; the context is rebuilt from there and later messages
are no longer visible.

Returns a short success string.",
        )
    }

    fn call(&self, args: &ToolArgs, ctx: &mut ToolContext<'_>) -> Result<String> {
        let instructions = args.require("instructions")?;
        let target = args.require_int("at_message_id")?;
        let target = usize::try_from(target).context("at_message_id out of range")?;
        if ctx.history.get(target).is_none() {
            return Err(HistoryError::OutOfRange {
                id: target,
                len: ctx.history.len(),
            }
            .into());
        }
        ctx.history.set_content(ctx.instructions_id, instructions)?;
        ctx.history.backtrack(target)?;
        Ok(format!(
            "Updated instructions and backtracked to message {target}."
        ))
    }
}
