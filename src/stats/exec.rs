use super::output::{output_json, output_ndjson, output_table, OutputContext};
use super::StatsRequest;
use crate::cache::{CacheEntry, StatsService, StatsSnapshot};
use crate::cli::CommonArgs;
use crate::git::{GitCli, GitRepo};
use crate::model::{StatsStatus, Strategy};
use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_REFRESH: Duration = Duration::from_millis(200);

pub fn exec(
    common: CommonArgs,
    branch: String,
    since: Option<String>,
    until: Option<String>,
    strategy: Option<Strategy>,
    json: bool,
    ndjson: bool,
) -> anyhow::Result<()> {
    let mut settings = common.settings()?;
    if let Some(strategy) = strategy {
        settings.stats.strategy = strategy;
    }

    let repo = GitRepo::open(common.repo.as_ref()).context("Failed to open git repository")?;
    let tip = repo
        .resolve_branch(&branch)
        .with_context(|| format!("Failed to resolve branch '{branch}'"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let service = StatsService::new(
        Arc::new(GitCli::new()),
        settings.stats.clone(),
        runtime.handle().clone(),
    );
    let request = StatsRequest::new(repo.path(), branch)
        .with_since(since.clone())
        .with_until(until.clone());

    // Keep stdout clean for machine-readable output
    let pb = if json || ndjson {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    let entry = service.entry(&request);
    let snapshot = runtime.block_on(wait_with_progress(&entry, &pb));
    pb.finish_and_clear();

    let result = match (snapshot.status, snapshot.result) {
        (StatsStatus::Ready, Some(result)) => result,
        (StatsStatus::Failed, _) => bail!(
            "Statistics computation failed: {}",
            snapshot.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        (status, _) => bail!("Statistics computation ended in unexpected state: {status}"),
    };

    let ctx = OutputContext {
        repo: &repo,
        tip: &tip,
        strategy: service.strategy(),
        since: since.as_deref(),
        until: until.as_deref(),
    };
    if json {
        output_json(&result, &ctx)?;
    } else if ndjson {
        output_ndjson(&result)?;
    } else {
        output_table(&result, &ctx)?;
    }

    Ok(())
}

/// Waits for the computation behind `entry`, mirroring its progress text
/// on the spinner.
async fn wait_with_progress(entry: &CacheEntry, pb: &ProgressBar) -> StatsSnapshot {
    let done = entry.wait();
    tokio::pin!(done);
    let mut refresh = tokio::time::interval(PROGRESS_REFRESH);
    loop {
        tokio::select! {
            snapshot = &mut done => return snapshot,
            _ = refresh.tick() => pb.set_message(entry.snapshot().progress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatsSettings;
    use crate::git::fake::{commit, FakeProvider};
    use std::sync::atomic::Ordering;
    use tokio::runtime::Handle;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_ttl_does_not_restart_the_computation() {
        let mut fake = FakeProvider::with_commits(vec![
            commit("c2", "bob@x.com", 1_700_086_400, &[("a.go", 5, 2)]),
            commit("c1", "alice@x.com", 1_700_000_000, &[("a.go", 10, 0)]),
        ]);
        fake.delay = Some(Duration::from_millis(300));
        let fake = Arc::new(fake);
        let settings = StatsSettings {
            cache_ttl: Duration::from_millis(1),
            ..StatsSettings::default()
        };
        let service = StatsService::new(fake.clone(), settings, Handle::current());
        let request = StatsRequest::new("/repo", "main");

        let entry = service.entry(&request);
        let snapshot = wait_with_progress(&entry, &ProgressBar::hidden()).await;

        assert_eq!(snapshot.status, StatsStatus::Ready);
        assert_eq!(snapshot.result.unwrap().total_lines, 13);
        assert_eq!(fake.raw_log_calls.load(Ordering::SeqCst), 1);
    }
}
