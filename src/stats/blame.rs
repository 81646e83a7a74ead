//! Present-day line ownership computed with `git blame`, one file per
//! worker on a bounded rayon pool, merged with a daily activity trend taken
//! from non-merge commits.
//!
//! Lines are filtered with [`is_effective_line`]: blank lines and lines
//! starting with a common comment marker are not counted. This is a
//! heuristic, not a parser, and its undercounting is part of the result.

use super::{Progress, ProgressTicker};
use crate::config::StatsSettings;
use crate::error::{GcontribError, Result};
use crate::git::GitLogProvider;
use crate::model::{merge_author_maps, AuthorMap, AuthorStat, DateRange, StatsResult};
use crate::util::{day_key, extension_bucket, is_effective_line};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

const FILE_PROGRESS_EVERY: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorTrend {
    pub name: String,
    pub days: BTreeMap<String, i64>,
}

pub fn aggregate(
    provider: &dyn GitLogProvider,
    path: &Path,
    branch: &str,
    range: &DateRange,
    settings: &StatsSettings,
    progress: Progress<'_>,
) -> Result<StatsResult> {
    let files = provider.list_files(path, branch)?;
    info!(files = files.len(), workers = settings.blame_workers, "blaming tracked files");
    progress(format!("Blaming {} files...", files.len()));

    let mut authors = blame_files(
        provider,
        path,
        branch,
        &files,
        range,
        settings.blame_workers,
        progress,
    )?;

    let trend = activity_trend(provider, path, branch, range, settings, progress)?;
    merge_trend(&mut authors, trend);

    Ok(StatsResult::from_authors(authors))
}

pub fn blame_files(
    provider: &dyn GitLogProvider,
    path: &Path,
    branch: &str,
    files: &[String],
    range: &DateRange,
    workers: usize,
    progress: Progress<'_>,
) -> Result<AuthorMap> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("gcontrib-blame-{i}"))
        .build()
        .map_err(|e| GcontribError::Task(format!("Failed to start blame workers: {e}")))?;

    let total = files.len();
    let done = AtomicUsize::new(0);

    let authors = pool.install(|| {
        files
            .par_iter()
            .fold(AuthorMap::new, |acc, file| {
                let partial = match blame_file(provider, path, branch, file, range) {
                    Ok(partial) => partial,
                    Err(e) => {
                        warn!(file = %file, error = %e, "skipping file");
                        AuthorMap::new()
                    }
                };
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % FILE_PROGRESS_EVERY == 0 || finished == total {
                    progress(format!("Blamed {finished}/{total} files..."));
                }
                merge_author_maps(acc, partial)
            })
            .reduce(AuthorMap::new, merge_author_maps)
    });

    Ok(authors)
}

/// Counts effective lines of one file per owning author. Any stream-level
/// error discards the whole file.
pub fn blame_file(
    provider: &dyn GitLogProvider,
    path: &Path,
    branch: &str,
    file: &str,
    range: &DateRange,
) -> Result<AuthorMap> {
    let extension = extension_bucket(file);
    let mut authors = AuthorMap::new();

    for line in provider.stream_blame(path, branch, file)? {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.is_item_level() => {
                debug!(file, error = %e, "skipping blame line");
                continue;
            }
            Err(e) => return Err(e),
        };
        if !is_effective_line(&line.text) || !range.contains(&line.author_time) {
            continue;
        }
        authors
            .entry(line.author_email.clone())
            .or_insert_with(|| AuthorStat::new(line.author_name.clone(), line.author_email.clone()))
            .add_lines(&extension, None, 1);
    }

    Ok(authors)
}

/// Added lines per author per day over non-merge commits in `range`.
pub fn activity_trend(
    provider: &dyn GitLogProvider,
    path: &Path,
    branch: &str,
    range: &DateRange,
    settings: &StatsSettings,
    progress: Progress<'_>,
) -> Result<HashMap<String, AuthorTrend>> {
    let mut trend: HashMap<String, AuthorTrend> = HashMap::new();
    let mut ticker = ProgressTicker::new(settings, progress);
    let mut commits = 0usize;

    for item in provider.stream_commit_stats(path, branch)? {
        let commit = match item {
            Ok(commit) => commit,
            Err(e) if e.is_item_level() => {
                warn!(error = %e, "skipping commit in activity trend");
                continue;
            }
            Err(e) => return Err(e),
        };
        commits += 1;
        ticker.tick(commits, || format!("Collected activity for {commits} commits..."));

        if commit.is_merge() || !range.contains(&commit.author_time) {
            continue;
        }

        let entry = trend
            .entry(commit.author_email.clone())
            .or_insert_with(|| AuthorTrend {
                name: commit.author_name.clone(),
                days: BTreeMap::new(),
            });
        *entry.days.entry(day_key(&commit.author_time)).or_insert(0) += commit.additions();
    }

    Ok(trend)
}

/// The trend replaces each author's day buckets; authors that only appear
/// in history are added with zero owned lines.
pub fn merge_trend(authors: &mut AuthorMap, trend: HashMap<String, AuthorTrend>) {
    for (email, author_trend) in trend {
        let stat = authors
            .entry(email.clone())
            .or_insert_with(|| AuthorStat::new(author_trend.name.clone(), email));
        stat.time_trend = author_trend.days;
    }
}
