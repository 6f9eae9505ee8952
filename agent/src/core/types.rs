//! Shared types for the agent core.
//!
//! These types define stable contracts between the history, the dispatcher and
//! the control loop. Serialized names are part of the trajectory export.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dense message identifier; equal to the node's index in the history arena.
pub type MessageId = usize;

/// Author of a history node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Instructor,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Instructor => "instructor",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control loop state for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// The terminating action completed; carries its payload.
    Finished(String),
    /// The step budget ran out before the terminating action.
    StepExhausted,
}
