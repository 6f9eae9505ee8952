//! `react-agent` command line.
//!
//! `run` drives one task to completion inside a working directory, `parse`
//! decodes protocol text offline, and `init-config` writes a default config.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use react_agent::agent::{RunError, assemble};
use react_agent::core::invariants::validate_invariants;
use react_agent::core::protocol::parse_action;
use react_agent::exit_codes;
use react_agent::io::config::{AgentConfig, load_config, write_config};
use react_agent::io::model;
use react_agent::io::sandbox::{LocalShell, Sandbox};
use react_agent::io::trajectory::write_json;
use react_agent::logging;

#[derive(Parser)]
#[command(name = "react-agent", version, about = "Reason-then-act agent harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent on one task until it calls finish or runs out of steps.
    Run(RunArgs),
    /// Decode the final function call in model output (file or stdin) and print it as JSON.
    Parse {
        /// File holding model output; reads stdin when omitted.
        path: Option<PathBuf>,
    },
    /// Write a config file with every default filled in.
    InitConfig {
        #[arg(default_value = "agent.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Task text given to the agent as the user message.
    #[arg(long, required_unless_present = "task_file", conflicts_with = "task_file")]
    task: Option<String>,
    /// Read the task text from a file.
    #[arg(long)]
    task_file: Option<PathBuf>,
    /// Agent config (TOML). Missing file means defaults.
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,
    /// Directory the shell tools run in (overrides `sandbox.workdir`).
    #[arg(long)]
    workdir: Option<PathBuf>,
    #[arg(long)]
    max_steps: Option<u32>,
    /// Model name (overrides `model.name`).
    #[arg(long)]
    model: Option<String>,
    /// Enable add_instructions_and_backtrack.
    #[arg(long)]
    backtrack: bool,
    /// Enable the file inspection, edit and verification tools.
    #[arg(long)]
    optional_tools: bool,
    /// Block finish until recent tool output shows a relevant staged diff.
    #[arg(long)]
    guard_empty_diff: bool,
    /// Instructor text.
    #[arg(long, conflicts_with = "use_default_instructor")]
    instructor: Option<String>,
    /// Use the built-in instructor text.
    #[arg(long)]
    use_default_instructor: bool,
    /// Write the trajectory JSON here after the run.
    #[arg(long)]
    trajectory: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, cfg: &mut AgentConfig) {
        if let Some(steps) = self.max_steps {
            cfg.max_steps = steps;
        }
        if let Some(model) = &self.model {
            cfg.model.name = model.clone();
        }
        if let Some(workdir) = &self.workdir {
            cfg.sandbox.workdir = workdir.clone();
        }
        cfg.tools.backtrack |= self.backtrack;
        cfg.tools.optional |= self.optional_tools;
        cfg.guards.require_change_before_finish |= self.guard_empty_diff;
        if let Some(text) = &self.instructor {
            cfg.instructions = text.clone();
        }
        cfg.use_default_instructor |= self.use_default_instructor;
    }

    fn task(&self) -> Result<String> {
        match (&self.task, &self.task_file) {
            (Some(task), _) => Ok(task.clone()),
            (None, Some(path)) => {
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
            }
            (None, None) => bail!("either --task or --task-file is required"),
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Parse { path } => cmd_parse(path.as_deref()),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut cfg = load_config(&args.config)?;
    args.apply(&mut cfg);
    cfg.validate()?;
    let task = args.task()?;

    let workdir = cfg
        .sandbox
        .workdir
        .canonicalize()
        .with_context(|| format!("resolve workdir {}", cfg.sandbox.workdir.display()))?;
    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalShell::from_config(&cfg.sandbox, workdir));
    let model = model::from_config(&cfg.model)?;
    let mut agent = assemble(&cfg, model, &sandbox)?;

    let outcome = agent.run(&task, cfg.max_steps);

    let problems = validate_invariants(agent.history());
    if !problems.is_empty() {
        warn!(?problems, "history invariants violated");
    }
    if let Some(path) = &args.trajectory {
        write_json(path, &agent.trajectory())?;
    }

    match outcome {
        Ok(result) => {
            println!("{result}");
            Ok(exit_codes::OK)
        }
        Err(err @ RunError::StepLimit { .. }) => {
            eprintln!("{err}");
            Ok(exit_codes::STEP_LIMIT)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_parse(path: Option<&Path>) -> Result<i32> {
    let text = match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    match parse_action(&text) {
        Ok(action) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&action).context("serialize action")?
            );
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("parse error: {err}");
            Ok(exit_codes::INVALID)
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())?;
    Ok(exit_codes::OK)
}
