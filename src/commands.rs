use crate::cli::CommonArgs;
use crate::git::repo::BranchTip;
use crate::git::{GitCli, GitRepo};
use crate::ingest::{CheckpointedIngestor, SyncReport};
use crate::model::{AuthorTotals, DateRange};
use crate::store::SqliteStore;
use anyhow::Context;
use console::style;

pub fn sync(common: CommonArgs, repo_id: i64, branch: String, json: bool) -> anyhow::Result<()> {
    let settings = common.settings()?;
    let repo = GitRepo::open(common.repo.as_ref()).context("Failed to open git repository")?;
    let tip = repo
        .resolve_branch(&branch)
        .with_context(|| format!("Failed to resolve branch '{branch}'"))?;

    let db_path = settings.database_path(repo.path());
    let mut store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open stats database {}", db_path.display()))?;

    let provider = GitCli::new();
    let report = CheckpointedIngestor::new(&provider, &mut store)
        .with_batch_size(settings.ingest.batch_size)
        .sync_repo_stats(repo_id, repo.path(), &branch)
        .context("Failed to sync commit statistics")?;
    let stored = store
        .count_commits(repo_id)
        .context("Failed to count stored commits")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &tip, stored);
    }
    Ok(())
}

fn print_report(report: &SyncReport, tip: &BranchTip, stored: u64) {
    println!("{}", style("Commit Stats Sync").bold());
    println!("{}", "─".repeat(40));
    match report.checkpoint {
        Some(checkpoint) => println!("Checkpoint:  {}", checkpoint.to_rfc3339()),
        None => println!("Checkpoint:  {}", style("none (full history)").dim()),
    }
    let id = &tip.commit_id;
    println!(
        "Branch tip:  {} ({})",
        id.get(..8).unwrap_or(id),
        tip.timestamp.format("%Y-%m-%d %H:%M")
    );
    println!("Scanned:     {}", report.scanned);
    println!("Written:     {} in {} batches", style(report.written).green(), report.batches);
    if report.skipped > 0 {
        println!("Skipped:     {}", style(report.skipped).yellow());
    }
    println!("Stored:      {}", stored);
}

pub fn authors(
    common: CommonArgs,
    repo_id: i64,
    since: Option<String>,
    until: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let settings = common.settings()?;
    let repo = GitRepo::open(common.repo.as_ref()).context("Failed to open git repository")?;
    let range = DateRange::from_days(since.as_deref(), until.as_deref())
        .context("Failed to resolve date range")?;

    let db_path = settings.database_path(repo.path());
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open stats database {}", db_path.display()))?;
    let totals = store
        .author_totals(repo_id, &range)
        .context("Failed to query author totals")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
    } else {
        print_totals(&totals);
    }
    Ok(())
}

fn print_totals(totals: &[AuthorTotals]) {
    if totals.is_empty() {
        println!("No data to display. Run `gcontrib sync` first.");
        return;
    }

    println!("{}", style("Author Totals").bold());
    println!("{}", "─".repeat(72));
    println!(
        "{:<32} {:>8} {:>10} {:>10} {:>8}",
        style("Email").bold(),
        style("Commits").bold(),
        style("Added").bold(),
        style("Deleted").bold(),
        style("Net").bold()
    );
    for t in totals {
        println!(
            "{:<32} {:>8} {:>10} {:>10} {:>8}",
            t.author_email,
            t.commits,
            style(format!("+{}", t.additions)).green(),
            style(format!("-{}", t.deletions)).red(),
            t.additions - t.deletions
        );
    }
}
