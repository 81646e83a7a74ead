pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod git;
pub mod ingest;
pub mod model;
pub mod stats;
pub mod store;
pub mod util;

pub use cache::{StatsService, StatsSnapshot};
pub use error::{GcontribError, Result};
pub use git::GitLogProvider;
pub use ingest::{sync_repo_stats, SyncReport};
pub use stats::StatsRequest;
