use crate::config::Settings;
use crate::model::Strategy;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gcontrib")]
#[command(about = "Per-author contribution statistics for git repositories")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Path to git repository")]
    pub repo: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to gcontrib.toml")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to stats database")]
    pub db: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,
}

impl CommonArgs {
    /// Configuration file and environment, with `--db` taking precedence.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings =
            Settings::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(db) = &self.db {
            settings.database.path = Some(db.clone());
        }
        Ok(settings)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest per-commit statistics into the stats database
    Sync {
        #[arg(long, help = "Repository identifier the rows are stored under")]
        repo_id: i64,

        #[arg(long, default_value = "HEAD", help = "Branch or revision to walk")]
        branch: String,

        #[arg(long, help = "Output the sync report as JSON")]
        json: bool,
    },
    /// Compute per-author line statistics
    Stats {
        #[arg(long, default_value = "HEAD", help = "Branch or revision to analyze")]
        branch: String,

        #[arg(long, help = "Only count changes on or after this day (YYYY-MM-DD)")]
        since: Option<String>,

        #[arg(long, help = "Only count changes on or before this day (YYYY-MM-DD)")]
        until: Option<String>,

        #[arg(long, value_enum, help = "Aggregation strategy (defaults to the configured one)")]
        strategy: Option<Strategy>,

        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[arg(long, help = "Output as NDJSON")]
        ndjson: bool,
    },
    /// Show stored per-author totals
    Authors {
        #[arg(long, help = "Repository identifier used during sync")]
        repo_id: i64,

        #[arg(long, help = "Only count commits on or after this day (YYYY-MM-DD)")]
        since: Option<String>,

        #[arg(long, help = "Only count commits on or before this day (YYYY-MM-DD)")]
        until: Option<String>,

        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Sync { repo_id, branch, json } => {
                crate::commands::sync(self.common, repo_id, branch, json)
            }
            Commands::Stats { branch, since, until, strategy, json, ndjson } => {
                crate::stats::exec(self.common, branch, since, until, strategy, json, ndjson)
            }
            Commands::Authors { repo_id, since, until, json } => {
                crate::commands::authors(self.common, repo_id, since, until, json)
            }
        }
    }
}
