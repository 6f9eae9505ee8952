//! The reason-then-act control loop.
//!
//! A run repeats: linearize the history, query the model, record its raw
//! output, parse one action, dispatch it and record the outcome. The loop ends
//! when the terminating action completes or the step budget runs out.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::clamp_steps;
use crate::core::guards::{GuardPolicy, has_relevant_change};
use crate::core::history::{History, HistoryError};
use crate::core::protocol::parse_action;
use crate::core::types::{LoopState, MessageId, Role};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::io::config::AgentConfig;
use crate::io::model::LanguageModel;
use crate::io::prompt::{ContextRenderer, PromptTemplates, SYSTEM_PROMPT, default_instructor};
use crate::io::sandbox::Sandbox;
use crate::io::trajectory::Trajectory;
use crate::tools::builtin::{Backtrack, FINISH, Finish};
use crate::tools::{RegistryError, Tool, shell};

pub const FINISH_BLOCKED: &str = "Guard blocked finish: no non-empty staged diff detected. Continue editing and call stage_and_diff before finish.";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Step limit reached without calling finish ({steps} steps)")]
    StepLimit { steps: u32 },
    #[error("model call failed")]
    Model(#[source] anyhow::Error),
    #[error("build context")]
    Context(#[source] anyhow::Error),
}

pub struct ReactAgent {
    name: String,
    started_at: i64,
    model: Box<dyn LanguageModel>,
    templates: PromptTemplates,
    history: History,
    dispatcher: Dispatcher,
    system_id: MessageId,
    user_id: MessageId,
    instructions_id: MessageId,
}

impl ReactAgent {
    /// Create an agent with the system, user and instructor nodes in place and
    /// `finish` registered.
    pub fn new(
        name: &str,
        model: Box<dyn LanguageModel>,
        policy: GuardPolicy,
    ) -> anyhow::Result<Self> {
        let mut history = History::new();
        let system_id = history.append(Role::System, SYSTEM_PROMPT);
        let user_id = history.append(Role::User, "");
        let instructions_id = history.append(Role::Instructor, "");

        let mut dispatcher = Dispatcher::new(policy);
        dispatcher.register(Box::new(Finish))?;

        Ok(Self {
            name: name.to_string(),
            started_at: Utc::now().timestamp(),
            model,
            templates: PromptTemplates::new()?,
            history,
            dispatcher,
            system_id,
            user_id,
            instructions_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_instructions(&mut self, instructions: &str) -> Result<(), HistoryError> {
        self.history.set_content(self.instructions_id, instructions)
    }

    pub fn instructions(&self) -> &str {
        self.content(self.instructions_id)
    }

    pub fn set_user_prompt(&mut self, prompt: &str) -> Result<(), HistoryError> {
        self.history.set_content(self.user_id, prompt)
    }

    pub fn user_prompt(&self) -> &str {
        self.content(self.user_id)
    }

    pub fn system_id(&self) -> MessageId {
        self.system_id
    }

    pub fn instructions_id(&self) -> MessageId {
        self.instructions_id
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        self.dispatcher.register(tool)
    }

    /// Expose `add_instructions_and_backtrack` to the model.
    pub fn enable_backtracking(&mut self) -> Result<(), RegistryError> {
        self.register(Box::new(Backtrack))
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Render the root-to-current path with the tool catalog as registered now.
    pub fn context(&self) -> anyhow::Result<String> {
        let renderer = ContextRenderer::new(&self.templates, self.dispatcher.registry().specs())?;
        Ok(self.history.linearize(&renderer))
    }

    pub fn trajectory(&self) -> Trajectory {
        Trajectory::capture(&self.name, self.started_at, &self.history)
    }

    /// Run until `finish` completes or `max_steps` (clamped to the ceiling) model turns pass.
    #[instrument(skip_all, fields(agent = %self.name, max_steps))]
    pub fn run(&mut self, task: &str, max_steps: u32) -> Result<String, RunError> {
        let steps = clamp_steps(max_steps);
        self.history
            .set_content(self.user_id, task)
            .map_err(|err| RunError::Context(err.into()))?;
        self.history
            .backtrack(self.instructions_id)
            .map_err(|err| RunError::Context(err.into()))?;

        let mut state = LoopState::Running;
        let mut taken = 0;
        while state == LoopState::Running {
            if taken == steps {
                state = LoopState::StepExhausted;
                break;
            }
            taken += 1;
            debug!(step = taken, "starting step");
            state = self.step()?;
        }

        match state {
            LoopState::Finished(result) => {
                info!(steps = taken, "finished");
                Ok(result)
            }
            LoopState::Running | LoopState::StepExhausted => {
                warn!(steps, "step limit reached");
                Err(RunError::StepLimit { steps })
            }
        }
    }

    /// One model turn and its outcome.
    fn step(&mut self) -> Result<LoopState, RunError> {
        let prompt = self.context().map_err(RunError::Context)?;
        debug!(prompt_bytes = prompt.len(), preview = %preview(&prompt, 80), "querying model");
        let output = self.model.generate(&prompt).map_err(RunError::Model)?;
        debug!(preview = %preview(&output, 800), "model output");
        self.history.append(Role::Assistant, output.as_str());

        let action = match parse_action(&output) {
            Ok(action) => action,
            Err(err) => {
                debug!(%err, "unparseable model output");
                self.history
                    .append(Role::Tool, format!("Error parsing model output: {err}"));
                return Ok(LoopState::Running);
            }
        };
        debug!(action = %action.name, arguments = ?action.arguments.keys().collect::<Vec<_>>(), "parsed call");

        let outcome = self
            .dispatcher
            .dispatch(&action, &mut self.history, self.instructions_id);
        self.history.append(Role::Tool, outcome.to_message());

        let DispatchOutcome::Completed(result) = outcome else {
            return Ok(LoopState::Running);
        };
        if action.name != FINISH {
            return Ok(LoopState::Running);
        }
        if self.dispatcher.policy().require_change_before_finish && !self.has_recent_change() {
            info!("finish blocked without a relevant change-set");
            self.history.append(Role::Tool, FINISH_BLOCKED);
            return Ok(LoopState::Running);
        }
        Ok(LoopState::Finished(result))
    }

    /// Recent tool outputs on the current path, newest first, checked for a
    /// change-set that touches an inspected resource.
    fn has_recent_change(&self) -> bool {
        let lookback = self.dispatcher.policy().change_lookback;
        let path = self.history.path();
        let outputs = path
            .iter()
            .rev()
            .filter_map(|id| self.history.get(*id))
            .filter(|message| message.role == Role::Tool)
            .take(lookback)
            .map(|message| message.content.as_str());
        has_relevant_change(outputs, self.dispatcher.inspected())
    }

    fn content(&self, id: MessageId) -> &str {
        self.history
            .get(id)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }
}

/// Build an agent with instructions and tools selected by `cfg`.
pub fn assemble(
    cfg: &AgentConfig,
    model: Box<dyn LanguageModel>,
    sandbox: &Arc<dyn Sandbox>,
) -> anyhow::Result<ReactAgent> {
    let mut agent = ReactAgent::new(&cfg.name, model, cfg.guards.clone())?;
    if !cfg.instructions.trim().is_empty() {
        agent.set_instructions(&cfg.instructions)?;
    } else if cfg.use_default_instructor {
        agent.set_instructions(default_instructor())?;
    }

    let mut tools = shell::required_tools(sandbox);
    if cfg.tools.optional {
        tools.extend(shell::optional_tools(sandbox));
    }
    for tool in tools {
        agent.register(tool)?;
    }
    if cfg.tools.backtrack {
        agent.enable_backtracking()?;
    }
    debug!(tools = agent.dispatcher().registry().len(), "agent assembled");
    Ok(agent)
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
