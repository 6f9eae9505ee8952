//! Test-only doubles for the model and sandbox seams.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};

use crate::core::protocol::{Action, format_action};
use crate::io::model::LanguageModel;
use crate::io::sandbox::{Sandbox, ShellOutput};

/// Model that replays canned responses and records every prompt it receives.
///
/// Clones share state, so a test can keep one handle after boxing another.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    responses: Arc<Mutex<VecDeque<String>>>,
    fallback: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    /// Returns `response` for every call.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted model has no responses left"))
    }
}

/// Sandbox that replays canned outputs and records every command.
///
/// Once the script runs out it answers with empty successful output.
#[derive(Default)]
pub struct ScriptedSandbox {
    outputs: Mutex<VecDeque<ShellOutput>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(outputs: Vec<ShellOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, command: &str) -> Result<ShellOutput> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
        let next = self
            .outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Ok(next.unwrap_or_else(|| ok("")))
    }
}

/// Successful output with the given stdout.
pub fn ok(stdout: &str) -> ShellOutput {
    ShellOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        stdout_truncated: false,
    }
}

/// Protocol text for a single call, preceded by a short thought.
pub fn call(name: &str, arguments: &[(&str, &str)]) -> String {
    let arguments: BTreeMap<String, String> = arguments
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    format_action(&Action {
        thought: format!("Next I will call {name}."),
        name: name.to_string(),
        arguments,
    })
}
