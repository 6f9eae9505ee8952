//! Single-instance execution.
//!
//! Each instance gets its own sandbox, model and agent. Whatever happens, the
//! trajectory file and the `preds.json` entry are written before returning.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument, warn};

use react_agent::agent::{ReactAgent, RunError, assemble};
use react_agent::io::config::AgentConfig;
use react_agent::io::model::LanguageModel;
use react_agent::io::sandbox::{LocalShell, Sandbox};
use react_agent::tools::shell::collect_patch;

use crate::instance::Instance;
use crate::results::{
    PredStore, Prediction, TrajectoryRecord, remove_trajectory, write_trajectory,
};

/// Builds a fresh model for each instance.
pub type ModelFactory<'a> = dyn Fn() -> Result<Box<dyn LanguageModel>> + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The agent called finish.
    Finished,
    /// The step budget ran out.
    StepLimit,
    /// Setup, model or context failure.
    Failed,
}

#[derive(Debug)]
pub struct InstanceOutcome {
    pub instance_id: String,
    pub status: Status,
    pub patch_bytes: usize,
    pub error: Option<String>,
}

/// Shared inputs for every instance in a batch.
pub struct BatchContext<'a> {
    pub config: &'a AgentConfig,
    pub output_dir: &'a Path,
    pub preds: &'a PredStore,
    pub make_model: &'a ModelFactory<'a>,
}

/// Run one instance and persist its artifacts.
///
/// Agent failures are recorded in the outcome; only persistence errors are
/// returned as `Err`.
#[instrument(skip_all, fields(instance_id = %instance.instance_id))]
pub fn process_instance(instance: &Instance, ctx: &BatchContext<'_>) -> Result<InstanceOutcome> {
    let id = instance.instance_id.as_str();
    ctx.preds.remove(id)?;
    remove_trajectory(ctx.output_dir, id)?;
    info!("processing instance");

    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalShell::from_config(
        &ctx.config.sandbox,
        instance.repo_path.clone(),
    ));

    let mut agent: Option<ReactAgent> = None;
    let (status, result, error) = match (ctx.make_model)()
        .and_then(|model| assemble(ctx.config, model, &sandbox))
    {
        Err(err) => (Status::Failed, String::new(), Some(format!("{err:#}"))),
        Ok(built) => {
            let agent = agent.insert(built);
            match agent.run(&instance.problem_statement, ctx.config.max_steps) {
                Ok(output) => (Status::Finished, collect_patch(sandbox.as_ref(), &output), None),
                Err(err @ RunError::StepLimit { .. }) => {
                    (Status::StepLimit, String::new(), Some(err.to_string()))
                }
                Err(err) => (
                    Status::Failed,
                    String::new(),
                    Some(format!("{:#}", anyhow::Error::from(err))),
                ),
            }
        }
    };
    if let Some(err) = &error {
        warn!(%err, "instance did not finish");
    }

    let trajectory = agent.as_ref().map(ReactAgent::trajectory);
    write_trajectory(
        ctx.output_dir,
        &TrajectoryRecord {
            instance_id: id,
            trajectory: trajectory.as_ref(),
            result: &result,
            error: error.clone(),
        },
    )?;
    ctx.preds.update(Prediction {
        model_name_or_path: ctx.config.model.name.clone(),
        instance_id: id.to_string(),
        model_patch: result.clone(),
    })?;

    info!(?status, patch_bytes = result.len(), "instance complete");
    Ok(InstanceOutcome {
        instance_id: id.to_string(),
        status,
        patch_bytes: result.len(),
        error,
    })
}
