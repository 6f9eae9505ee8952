mod cli;
mod instance;
mod pool;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bench", version, about = "Batch harness for react-agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent over an instance file and collect predictions.
    Run(cli::RunArgs),
    /// Summarize an output directory's predictions.
    Report {
        #[arg(short, long, default_value = "outputs")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    react_agent::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cli::run_batch(&args),
        Command::Report { output } => cli::report(&output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["bench", "run", "--instances", "set.jsonl"]).expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.output, PathBuf::from("outputs"));
        assert_eq!(args.workers, 10);
        assert_eq!(args.limit, 0);
        assert!(!args.backtrack);
    }

    #[test]
    fn instructor_flags_conflict() {
        assert!(
            Cli::try_parse_from([
                "bench",
                "run",
                "--instances",
                "set.jsonl",
                "--instructor",
                "x",
                "--use-default-instructor",
            ])
            .is_err()
        );
    }
}
