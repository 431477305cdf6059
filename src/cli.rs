//! Command line interface built on clap.
//!
//! [`Cli`] carries the global flags (config file, state directory,
//! verbosity) and one [`Command`] per operator action.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

/// recruitflow: runs recruitment workflows through AI stage agents.
#[derive(Debug, Parser)]
#[command(name = "recruitflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to ./recruitflow.toml when present.
    #[arg(long, global = true, env = "RECRUITFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding workflow state. Overrides `store_dir`.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// More log output; repeat for debug (-vv) and trace (-vvv).
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default log level for the verbosity flag. `RUST_LOG` still wins.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a job from a TOML or JSON file and print its id.
    Submit {
        /// Job definition file.
        file: PathBuf,

        /// Run the job right after registering it.
        #[arg(long)]
        run: bool,

        /// Use the built-in scripted backend instead of real providers.
        #[arg(long)]
        offline: bool,
    },

    /// Drive one or more jobs until they complete or fail.
    Run {
        /// Ids of submitted jobs.
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Use the built-in scripted backend instead of real providers.
        #[arg(long)]
        offline: bool,
    },

    /// Show the state of one job, or of every stored job.
    Status {
        job_id: Option<String>,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decide on a candidate the job paused on for manual review.
    Review {
        job_id: String,
        candidate_id: String,
        decision: Decision,
    },

    /// Stop a job; a running worker stops before its next invocation.
    Cancel { job_id: String },

    /// Print the provider chain configured for each task class.
    Routes,
}

/// Reviewer verdict accepted by `review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Decision {
    /// Draft outreach despite the score.
    Approve,
    /// Skip the candidate.
    Reject,
}

impl Decision {
    pub fn approved(self) -> bool {
        self == Decision::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_with_several_jobs() {
        let cli = Cli::parse_from(["recruitflow", "run", "J1", "J2", "--offline"]);
        match cli.command {
            Command::Run { job_ids, offline } => {
                assert_eq!(job_ids, vec!["J1", "J2"]);
                assert!(offline);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_run_requires_a_job() {
        assert!(Cli::try_parse_from(["recruitflow", "run"]).is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "recruitflow",
            "--config",
            "custom.toml",
            "--store",
            "/tmp/state",
            "-vv",
            "status",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/state")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_level(), "debug");
        assert!(matches!(
            cli.command,
            Command::Status {
                job_id: None,
                json: false
            }
        ));
    }

    #[test]
    fn cli_parses_submit_and_cancel() {
        let cli = Cli::parse_from(["recruitflow", "submit", "job.toml", "--run"]);
        match cli.command {
            Command::Submit { file, run, offline } => {
                assert_eq!(file, PathBuf::from("job.toml"));
                assert!(run);
                assert!(!offline);
            }
            _ => panic!("expected Submit command"),
        }

        let cli = Cli::parse_from(["recruitflow", "cancel", "J7"]);
        assert!(matches!(cli.command, Command::Cancel { job_id } if job_id == "J7"));
    }

    #[test]
    fn cli_parses_review_decision() {
        let cli = Cli::parse_from(["recruitflow", "review", "J1", "c-42", "approve"]);
        match cli.command {
            Command::Review {
                job_id,
                candidate_id,
                decision,
            } => {
                assert_eq!(job_id, "J1");
                assert_eq!(candidate_id, "c-42");
                assert!(decision.approved());
            }
            _ => panic!("expected Review command"),
        }
        assert!(Cli::try_parse_from(["recruitflow", "review", "J1", "c-42", "maybe"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
