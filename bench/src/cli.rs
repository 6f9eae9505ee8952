//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tracing::{debug, error, info};

use react_agent::io::config::{AgentConfig, load_config};
use react_agent::io::model::{self, LanguageModel};

use crate::instance::load_instances;
use crate::pool::run_bounded;
use crate::results::{PREDS_FILE, PredStore, read_predictions, summarize};
use crate::run::{BatchContext, Status, process_instance};

#[derive(Args)]
pub struct RunArgs {
    /// Instance file: JSON array or JSONL of {instance_id, problem_statement, repo_path}.
    #[arg(long)]
    pub instances: PathBuf,
    #[arg(short, long, default_value = "outputs")]
    pub output: PathBuf,
    #[arg(long, default_value_t = 10)]
    pub workers: usize,
    /// Process only the first N instances (0 = all).
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
    /// Agent config (TOML). Missing file means defaults.
    #[arg(long, default_value = "agent.toml")]
    pub config: PathBuf,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub max_steps: Option<u32>,
    /// Enable add_instructions_and_backtrack.
    #[arg(long)]
    pub backtrack: bool,
    /// Enable the file inspection, edit and verification tools.
    #[arg(long)]
    pub optional_tools: bool,
    /// Block finish until recent tool output shows a relevant staged diff.
    #[arg(long)]
    pub guard_empty_diff: bool,
    /// Instructor text; takes precedence over the built-in one.
    #[arg(long, conflicts_with = "use_default_instructor")]
    pub instructor: Option<String>,
    #[arg(long)]
    pub use_default_instructor: bool,
}

impl RunArgs {
    fn apply(&self, cfg: &mut AgentConfig) {
        if let Some(model) = &self.model {
            cfg.model.name = model.clone();
        }
        if let Some(steps) = self.max_steps {
            cfg.max_steps = steps;
        }
        cfg.tools.backtrack |= self.backtrack;
        cfg.tools.optional |= self.optional_tools;
        cfg.guards.require_change_before_finish |= self.guard_empty_diff;
        if let Some(text) = &self.instructor {
            cfg.instructions = text.clone();
        }
        cfg.use_default_instructor |= self.use_default_instructor;
    }
}

/// Run every selected instance through the agent with a bounded worker pool.
pub fn run_batch(args: &RunArgs) -> Result<()> {
    let mut cfg = load_config(&args.config)?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let mut instances = load_instances(&args.instances)?;
    if args.limit > 0 {
        instances.truncate(args.limit);
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("create {}", args.output.display()))?;
    println!("run: output={}", args.output.display());
    println!(
        "run: instances={} workers={} model={}",
        instances.len(),
        args.workers,
        cfg.model.name
    );

    let preds = PredStore::new(&args.output);
    let make_model = || -> Result<Box<dyn LanguageModel>> { model::from_config(&cfg.model) };
    let ctx = BatchContext {
        config: &cfg,
        output_dir: &args.output,
        preds: &preds,
        make_model: &make_model,
    };

    let started_at = Utc::now();
    info!(instances = instances.len(), workers = args.workers, "batch started");
    let outcomes = run_bounded(&instances, args.workers, |instance| {
        let outcome = process_instance(instance, &ctx);
        match &outcome {
            Ok(outcome) => println!(
                "completed: instance={} status={:?} patch_bytes={}{}",
                outcome.instance_id,
                outcome.status,
                outcome.patch_bytes,
                outcome
                    .error
                    .as_deref()
                    .map(|err| format!(" error={err}"))
                    .unwrap_or_default()
            ),
            Err(err) => {
                error!(instance_id = %instance.instance_id, err = %format!("{err:#}"), "instance crashed");
                println!(
                    "completed: instance={} status=Crashed error={err:#}",
                    instance.instance_id
                );
            }
        }
        outcome
    });

    let finished = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(o) if o.status == Status::Finished))
        .count();
    let elapsed = Utc::now() - started_at;
    debug!(elapsed_ms = elapsed.num_milliseconds(), "batch finished");
    println!(
        "run: finished={} unfinished={} elapsed_secs={:.1}",
        finished,
        outcomes.len() - finished,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    Ok(())
}

/// Summarize `<output>/preds.json`.
pub fn report(output: &Path) -> Result<()> {
    let path = output.join(PREDS_FILE);
    let summary = summarize(&read_predictions(&path)?);
    println!("report: preds={}", path.display());
    println!(
        "report: total={} with_diff={} empty={} other={}",
        summary.total,
        summary.with_diff,
        summary.empty,
        summary.total - summary.with_diff - summary.empty
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_layer_over_config() {
        let args = RunArgs {
            instances: PathBuf::from("i.jsonl"),
            output: PathBuf::from("outputs"),
            workers: 2,
            limit: 0,
            config: PathBuf::from("agent.toml"),
            model: Some("gpt-4o".to_string()),
            max_steps: Some(30),
            backtrack: true,
            optional_tools: true,
            guard_empty_diff: false,
            instructor: None,
            use_default_instructor: true,
        };
        let mut cfg = AgentConfig::default();
        cfg.guards.require_change_before_finish = true;
        args.apply(&mut cfg);
        assert_eq!(cfg.model.name, "gpt-4o");
        assert_eq!(cfg.max_steps, 30);
        assert!(cfg.tools.backtrack && cfg.tools.optional);
        assert!(cfg.guards.require_change_before_finish, "flags only switch on");
        assert!(cfg.use_default_instructor);
    }
}
