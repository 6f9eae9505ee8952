//! Guarded dispatch of parsed actions to registered tools.
//!
//! Dispatch never fails: unknown names, guard rejections and tool errors all
//! come back as a [`DispatchOutcome`] whose text is recorded in the history.

use tracing::{debug, info, instrument, warn};

use crate::core::guards::{GuardPolicy, InspectionLog};
use crate::core::history::History;
use crate::core::protocol::Action;
use crate::core::types::MessageId;
use crate::tools::{Registry, RegistryError, Tool, ToolArgs, ToolContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(String),
    UnknownAction(String),
    Rejected { name: String, reason: String },
    Failed { name: String, error: String },
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed(_))
    }

    /// Text recorded as the `tool` node for this outcome.
    pub fn to_message(&self) -> String {
        match self {
            DispatchOutcome::Completed(output) => output.clone(),
            DispatchOutcome::UnknownAction(name) => format!("Error: unknown function '{name}'"),
            DispatchOutcome::Rejected { reason, .. } => reason.clone(),
            DispatchOutcome::Failed { name, error } => format!("Error executing {name}: {error}"),
        }
    }
}

/// Tools plus the run-scoped guard state they are checked against.
pub struct Dispatcher {
    registry: Registry,
    policy: GuardPolicy,
    inspected: InspectionLog,
}

impl Dispatcher {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            registry: Registry::new(),
            policy,
            inspected: InspectionLog::default(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        self.registry.register(tool)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Resources inspected or edited so far in this run.
    pub fn inspected(&self) -> &InspectionLog {
        &self.inspected
    }

    #[instrument(skip_all, fields(action = %action.name))]
    pub fn dispatch(
        &mut self,
        action: &Action,
        history: &mut History,
        instructions_id: MessageId,
    ) -> DispatchOutcome {
        let Some(entry) = self.registry.get(&action.name) else {
            warn!("unknown action");
            return DispatchOutcome::UnknownAction(action.name.clone());
        };

        let args = ToolArgs::bind(&entry.spec, &action.arguments);
        let dropped = action.arguments.len() - args.as_map().len();
        if dropped > 0 {
            debug!(dropped, "ignored undeclared arguments");
        }

        if let Err(reason) = self
            .policy
            .check_edit(&action.name, args.as_map(), &self.inspected)
        {
            info!(%reason, "guard rejected action");
            return DispatchOutcome::Rejected {
                name: action.name.clone(),
                reason,
            };
        }

        let mut ctx = ToolContext {
            history,
            instructions_id,
        };
        match entry.call(&args, &mut ctx) {
            Ok(output) => {
                if (self.policy.is_inspect(&action.name) || self.policy.is_edit(&action.name))
                    && let Some(resource) = self.policy.resource(args.as_map())
                {
                    self.inspected.record(resource);
                }
                debug!(output_bytes = output.len(), "action completed");
                DispatchOutcome::Completed(output)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "action failed");
                DispatchOutcome::Failed {
                    name: action.name.clone(),
                    error: format!("{err:#}"),
                }
            }
        }
    }
}
