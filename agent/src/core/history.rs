//! Append-only conversation history with a movable cursor.
//!
//! Nodes live in an arena indexed by [`MessageId`]. Backtracking only moves the
//! `current` pointer, so abandoned branches remain addressable for audit while
//! dropping out of the linearized context.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::core::types::{MessageId, Role};

/// One node of the history tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Unix seconds at creation.
    pub timestamp: i64,
    pub id: MessageId,
    pub parent: Option<MessageId>,
    pub children: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("message id {id} out of range (history has {len} messages)")]
    OutOfRange { id: MessageId, len: usize },
}

/// Renders a single node into context text.
pub trait MessageRenderer {
    fn render(&self, message: &Message) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<Message>,
    root: Option<MessageId>,
    current: Option<MessageId>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node under `current` (or the root when empty) and move `current` to it.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let id = self.messages.len();
        let parent = self.current;
        self.messages.push(Message {
            role,
            content: content.into(),
            timestamp: Utc::now().timestamp(),
            id,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent_id) => self.messages[parent_id].children.push(id),
            None => self.root = Some(id),
        }
        self.current = Some(id);
        id
    }

    pub fn set_content(
        &mut self,
        id: MessageId,
        content: impl Into<String>,
    ) -> Result<(), HistoryError> {
        self.check(id)?;
        self.messages[id].content = content.into();
        Ok(())
    }

    /// Re-root future appends and context construction at `id`.
    pub fn backtrack(&mut self, id: MessageId) -> Result<(), HistoryError> {
        self.check(id)?;
        self.current = Some(id);
        Ok(())
    }

    /// Ids from the root down to `current`.
    pub fn path(&self) -> Vec<MessageId> {
        let mut ids = Vec::new();
        let mut cursor = self.current;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.messages[id].parent;
        }
        ids.reverse();
        ids
    }

    /// Render the root-to-current path into one context string.
    pub fn linearize<R: MessageRenderer + ?Sized>(&self, renderer: &R) -> String {
        self.path()
            .into_iter()
            .map(|id| renderer.render(&self.messages[id]))
            .collect()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn root(&self) -> Option<MessageId> {
        self.root
    }

    pub fn current(&self) -> Option<MessageId> {
        self.current
    }

    fn check(&self, id: MessageId) -> Result<(), HistoryError> {
        if id >= self.messages.len() {
            return Err(HistoryError::OutOfRange {
                id,
                len: self.messages.len(),
            });
        }
        Ok(())
    }
}
