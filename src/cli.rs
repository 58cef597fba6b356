//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use fabsync_universe::TreeKind;

/// fabsync - keeps fabric configuration converged with a desired-state store
#[derive(Parser, Debug)]
#[command(name = "fabsync")]
#[command(version)]
#[command(about = "Keeps network fabric configuration converged with a desired-state store")]
#[command(
    long_about = "fabsync compares per-tenant hash trees of a desired-state store and a fabric, pushes the difference, and escalates resources that never converge from retry with backoff to tenant reset to failure."
)]
pub struct Cli {
    /// Configuration file (defaults to ./fabsync.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the hash trees of a state file
    Tree {
        /// State file
        #[arg(short, long)]
        state: PathBuf,

        /// Tree kind to build
        #[arg(short, long, value_enum, default_value_t = KindArg::Config)]
        kind: KindArg,
    },

    /// Print what would be created and deleted to make one state match another
    Diff {
        /// Desired state file
        #[arg(short, long)]
        desired: PathBuf,

        /// Observed state file
        #[arg(short, long)]
        observed: PathBuf,

        /// Tree kind to compare
        #[arg(short, long, value_enum, default_value_t = KindArg::Config)]
        kind: KindArg,
    },

    /// Reconcile an observed state towards a desired one
    Run {
        /// Desired state file
        #[arg(short, long)]
        desired: PathBuf,

        /// Observed state file (starts empty when omitted)
        #[arg(short, long)]
        observed: Option<PathBuf>,

        /// Stop after this many passes instead of running until Ctrl+C
        #[arg(short, long)]
        max_passes: Option<u64>,

        /// Write the final observed state here
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Tree kind as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Config,
    Operational,
    Monitored,
}

impl From<KindArg> for TreeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Config => Self::Config,
            KindArg::Operational => Self::Operational,
            KindArg::Monitored => Self::Monitored,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unreachable)]

    use super::*;

    #[test]
    fn test_parse_diff() {
        let cli = Cli::try_parse_from([
            "fabsync", "diff", "--desired", "a.json", "--observed", "b.json", "--kind", "monitored",
        ])
        .unwrap();
        match cli.command {
            Commands::Diff { desired, kind, .. } => {
                assert_eq!(desired, PathBuf::from("a.json"));
                assert_eq!(TreeKind::from(kind), TreeKind::Monitored);
            }
            other => unreachable!("parsed {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_with_global_config() {
        let cli = Cli::try_parse_from([
            "fabsync", "run", "-d", "a.json", "--max-passes", "5", "--config", "f.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("f.toml")));
        assert!(matches!(
            cli.command,
            Commands::Run { max_passes: Some(5), observed: None, .. }
        ));
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
