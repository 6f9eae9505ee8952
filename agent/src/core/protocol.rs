//! Textual function-call protocol shared with the model.
//!
//! The model ends every turn with exactly one delimited call. Recovery is
//! anchored on the rightmost markers: reasoning may quote the protocol, and only
//! the final delimited block is authoritative.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

pub const BEGIN_CALL: &str = "----BEGIN_FUNCTION_CALL----";
pub const END_CALL: &str = "----END_FUNCTION_CALL----";
pub const ARG_SEP: &str = "----ARG----";

/// Template shown to the model in the system message.
pub const RESPONSE_FORMAT: &str = "
your_thoughts_here
...
----BEGIN_FUNCTION_CALL----
function_name
----ARG----
arg1_name
arg1_value (can be multiline)
----ARG----
arg2_name
arg2_value (can be multiline)
...
----END_FUNCTION_CALL----
";

/// One decoded call. Never persisted; its effects become history nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub thought: String,
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing END_FUNCTION_CALL delimiter")]
    MissingEnd,
    #[error("missing BEGIN_FUNCTION_CALL delimiter before END_FUNCTION_CALL")]
    MissingBegin,
    #[error("malformed function call: missing function name")]
    EmptyFunctionName,
    #[error("malformed argument block: expected name and value, got {0:?}")]
    ArgumentWithoutValue(String),
    #[error("malformed argument block: missing argument name")]
    EmptyArgumentName,
}

/// Extract the final function call embedded in `text`.
pub fn parse_action(text: &str) -> Result<Action, ParseError> {
    let end_idx = text.rfind(END_CALL).ok_or(ParseError::MissingEnd)?;
    let begin_idx = text[..end_idx]
        .rfind(BEGIN_CALL)
        .ok_or(ParseError::MissingBegin)?;

    let thought = text[..begin_idx].trim().to_string();
    let body = &text[begin_idx + BEGIN_CALL.len()..end_idx];

    let mut parts = body.split(ARG_SEP);
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(ParseError::EmptyFunctionName);
    }

    let mut arguments = BTreeMap::new();
    for block in parts {
        let segment = block.trim_start_matches(['\n', '\r']);
        if segment.trim().is_empty() {
            continue;
        }
        let Some(newline_idx) = segment.find('\n') else {
            return Err(ParseError::ArgumentWithoutValue(segment.trim().to_string()));
        };
        let arg_name = segment[..newline_idx].trim();
        if arg_name.is_empty() {
            return Err(ParseError::EmptyArgumentName);
        }
        let value = trim_blank_lines(&segment[newline_idx + 1..]);
        arguments.insert(arg_name.to_string(), value.to_string());
    }

    Ok(Action {
        thought,
        name: name.to_string(),
        arguments,
    })
}

/// Drop whitespace-only lines at both ends; the first content line keeps its indent.
fn trim_blank_lines(value: &str) -> &str {
    let value = value.trim_end();
    let mut start = 0;
    for line in value.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    &value[start..]
}

/// Render an action back into protocol text.
pub fn format_action(action: &Action) -> String {
    let mut buf = String::new();
    if !action.thought.is_empty() {
        buf.push_str(&action.thought);
        buf.push('\n');
    }
    buf.push_str(BEGIN_CALL);
    buf.push('\n');
    buf.push_str(&action.name);
    buf.push('\n');
    for (name, value) in &action.arguments {
        buf.push_str(ARG_SEP);
        buf.push('\n');
        buf.push_str(name);
        buf.push('\n');
        buf.push_str(value);
        buf.push('\n');
    }
    buf.push_str(END_CALL);
    buf
}
