//! One-way JSON export of a run's history.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::history::{History, Message};
use crate::core::types::MessageId;
use crate::io::config::write_atomic;

/// Snapshot of an agent's history. Never read back by the agent.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub name: String,
    /// Unix seconds when the agent was created.
    pub timestamp: i64,
    pub root_message_id: Option<MessageId>,
    pub current_message_id: Option<MessageId>,
    pub messages: Vec<Message>,
}

impl Trajectory {
    pub fn capture(name: &str, timestamp: i64, history: &History) -> Self {
        Self {
            name: name.to_string(),
            timestamp,
            root_message_id: history.root(),
            current_message_id: history.current(),
            messages: history.messages().to_vec(),
        }
    }
}

/// Write `value` as pretty JSON, replacing any previous file atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    #[test]
    fn export_keeps_abandoned_branches() {
        let mut history = History::new();
        history.append(Role::System, "s");
        let user = history.append(Role::User, "u");
        history.append(Role::Assistant, "dead end");
        history.backtrack(user).expect("backtrack");
        history.append(Role::Assistant, "retry");

        let traj = Trajectory::capture("swe-agent", 1_700_000_000, &history);
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run").join("traj.json");
        write_json(&path, &traj).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["name"], "swe-agent");
        assert_eq!(value["root_message_id"], 0);
        assert_eq!(value["current_message_id"], 3);
        assert_eq!(value["messages"].as_array().expect("messages").len(), 4);
        assert_eq!(value["messages"][1]["children"], serde_json::json!([2, 3]));
        assert_eq!(value["messages"][2]["role"], "assistant");
    }
}
