pub mod blame;
pub mod exec;
pub mod fast;
pub mod output;

pub use exec::exec;

use crate::config::StatsSettings;
use crate::error::Result;
use crate::git::GitLogProvider;
use crate::model::{DateRange, StatsResult, Strategy};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Receives human-readable progress text while a computation runs.
pub type Progress<'a> = &'a (dyn Fn(String) + Sync);

/// Identifies one statistics computation; equal requests share a cache
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsRequest {
    pub path: PathBuf,
    pub branch: String,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl StatsRequest {
    pub fn new<P: Into<PathBuf>, B: Into<String>>(path: P, branch: B) -> Self {
        Self {
            path: path.into(),
            branch: branch.into(),
            since: None,
            until: None,
        }
    }

    pub fn with_since(mut self, since: Option<String>) -> Self {
        self.since = since;
        self
    }

    pub fn with_until(mut self, until: Option<String>) -> Self {
        self.until = until;
        self
    }

    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.path.display(),
            self.branch,
            self.since.as_deref().unwrap_or(""),
            self.until.as_deref().unwrap_or("")
        )
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::from_days(self.since.as_deref(), self.until.as_deref())
    }
}

pub fn compute_stats(
    provider: &dyn GitLogProvider,
    strategy: Strategy,
    request: &StatsRequest,
    settings: &StatsSettings,
    progress: Progress<'_>,
) -> Result<StatsResult> {
    let range = request.date_range()?;
    match strategy {
        Strategy::Fast => fast::aggregate(
            provider,
            &request.path,
            &request.branch,
            &range,
            settings,
            progress,
        ),
        Strategy::Blame => blame::aggregate(
            provider,
            &request.path,
            &request.branch,
            &range,
            settings,
            progress,
        ),
    }
}

/// Publishes progress every `every` items, or sooner once `interval` has
/// passed since the last publication.
pub struct ProgressTicker<'a> {
    every: usize,
    interval: Duration,
    last: Instant,
    sink: Progress<'a>,
}

impl<'a> ProgressTicker<'a> {
    pub fn new(settings: &StatsSettings, sink: Progress<'a>) -> Self {
        Self {
            every: settings.progress_every.max(1),
            interval: settings.progress_interval,
            last: Instant::now(),
            sink,
        }
    }

    pub fn tick<F: FnOnce() -> String>(&mut self, count: usize, message: F) {
        if count % self.every == 0 || self.last.elapsed() > self.interval {
            (self.sink)(message());
            self.last = Instant::now();
        }
    }
}
