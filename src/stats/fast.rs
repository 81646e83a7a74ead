//! Net line deltas per author, extension and day, streamed straight from
//! `git log --numstat`. Binary changes count for nothing.

use super::{Progress, ProgressTicker};
use crate::config::StatsSettings;
use crate::error::Result;
use crate::git::parse::{parse_log_line, LogLine};
use crate::git::GitLogProvider;
use crate::model::{AuthorMap, AuthorStat, DateRange, StatsResult};
use crate::util::{day_key, extension_bucket};
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

pub fn aggregate(
    provider: &dyn GitLogProvider,
    path: &Path,
    branch: &str,
    range: &DateRange,
    settings: &StatsSettings,
    progress: Progress<'_>,
) -> Result<StatsResult> {
    let log = provider.stream_raw_log(path, branch)?;
    let mut ticker = ProgressTicker::new(settings, progress);
    let authors = aggregate_log(log, range, &mut ticker)?;
    Ok(StatsResult::from_authors(authors))
}

struct CurrentCommit {
    name: String,
    email: String,
    time: DateTime<Utc>,
    day: String,
}

pub fn aggregate_log<R: BufRead>(
    reader: R,
    range: &DateRange,
    ticker: &mut ProgressTicker<'_>,
) -> Result<AuthorMap> {
    let mut authors = AuthorMap::new();
    let mut current: Option<CurrentCommit> = None;
    let mut commits = 0usize;

    for line in reader.split(b'\n') {
        let line = line?;
        let line = String::from_utf8_lossy(&line);

        match parse_log_line(&line) {
            Ok(LogLine::Header(header)) => {
                commits += 1;
                ticker.tick(commits, || format!("Processed {commits} commits..."));
                current = Some(CurrentCommit {
                    day: day_key(&header.author_time),
                    name: header.author_name,
                    email: header.author_email,
                    time: header.author_time,
                });
            }
            Ok(LogLine::NumStat(change)) => {
                let Some(commit) = current.as_ref() else {
                    continue;
                };
                if change.is_binary || !range.contains(&commit.time) {
                    continue;
                }
                let net = change.added_lines as i64 - change.deleted_lines as i64;
                authors
                    .entry(commit.email.clone())
                    .or_insert_with(|| AuthorStat::new(commit.name.clone(), commit.email.clone()))
                    .add_lines(&extension_bucket(&change.path), Some(&commit.day), net);
            }
            Ok(LogLine::Other) => {}
            Err(e) => {
                commits += 1;
                debug!(error = %e, "ignoring lines of malformed commit");
                current = None;
            }
        }
    }

    Ok(authors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::{commit, FakeProvider};
    use crate::model::FileChange;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Duration;

    fn run(provider: &FakeProvider, range: &DateRange) -> StatsResult {
        let noop = |_: String| {};
        aggregate(
            provider,
            Path::new("."),
            "main",
            range,
            &StatsSettings::default(),
            &noop,
        )
        .unwrap()
    }

    #[test]
    fn two_commit_example() {
        let provider = FakeProvider::with_commits(vec![
            commit("c2", "bob@x.com", 1_700_086_400, &[("a.go", 5, 2)]),
            commit("c1", "alice@x.com", 1_700_000_000, &[("a.go", 10, 0)]),
        ]);

        let result = run(&provider, &DateRange::new());

        assert_eq!(result.total_lines, 13);
        let alice = result.author("alice@x.com").unwrap();
        assert_eq!(alice.total_lines, 10);
        assert_eq!(alice.file_types, BTreeMap::from([("go".to_string(), 10)]));
        assert_eq!(
            alice.time_trend,
            BTreeMap::from([("2023-11-14".to_string(), 10)])
        );
        let bob = result.author("bob@x.com").unwrap();
        assert_eq!(bob.total_lines, 3);
        assert_eq!(bob.file_types, BTreeMap::from([("go".to_string(), 3)]));
    }

    #[test]
    fn binary_and_extensionless_files() {
        let mut c = commit("c1", "alice@x.com", 100, &[("README", 4, 1)]);
        c.files.push(FileChange {
            path: "assets/logo.png".to_string(),
            added_lines: 0,
            deleted_lines: 0,
            is_binary: true,
        });
        let result = run(&FakeProvider::with_commits(vec![c]), &DateRange::new());

        let alice = result.author("alice@x.com").unwrap();
        assert_eq!(alice.total_lines, 3);
        assert_eq!(alice.file_types, BTreeMap::from([("unknown".to_string(), 3)]));
        assert!(!alice.file_types.contains_key("png"));
    }

    #[test]
    fn binary_only_author_is_absent() {
        let raw = "COMMIT|c1|Alice|alice@x.com|100\n-\t-\tassets/logo.png\n";
        let noop = |_: String| {};
        let settings = StatsSettings::default();
        let mut ticker = ProgressTicker::new(&settings, &noop);

        let authors = aggregate_log(Cursor::new(raw), &DateRange::new(), &mut ticker).unwrap();
        assert!(authors.is_empty());
    }

    #[test]
    fn date_filter_uses_commit_time() {
        // 2024-03-10T23:59:59Z and 2024-03-11T00:00:00Z
        let provider = FakeProvider::with_commits(vec![
            commit("late", "bob@x.com", 1_710_115_200, &[("x.rs", 7, 0)]),
            commit("edge", "alice@x.com", 1_710_115_199, &[("x.rs", 2, 0)]),
        ]);
        let range = DateRange::from_days(Some("2024-03-10"), Some("2024-03-10")).unwrap();

        let result = run(&provider, &range);

        assert_eq!(result.authors.len(), 1);
        assert_eq!(result.author("alice@x.com").unwrap().total_lines, 2);
        assert_eq!(result.total_lines, 2);
    }

    #[test]
    fn numstat_after_malformed_header_is_ignored() {
        let raw = "COMMIT|c2|Bob|bob@x.com|bogus\n9\t0\tb.rs\nCOMMIT|c1|Alice|alice@x.com|100\n1\t0\ta.rs\n";
        let noop = |_: String| {};
        let settings = StatsSettings::default();
        let mut ticker = ProgressTicker::new(&settings, &noop);

        let authors = aggregate_log(Cursor::new(raw), &DateRange::new(), &mut ticker).unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors["alice@x.com"].total_lines, 1);
    }

    #[test]
    fn negative_net_contributions() {
        let provider = FakeProvider::with_commits(vec![commit(
            "c1",
            "carol@x.com",
            100,
            &[("lib.rs", 1, 10), ("mod.rs", 0, 0)],
        )]);
        let result = run(&provider, &DateRange::new());
        assert_eq!(result.total_lines, -9);
        assert_eq!(result.author("carol@x.com").unwrap().file_types["rs"], -9);
    }

    #[test]
    fn reports_progress_per_commit_batch() {
        let commits = (0..5)
            .map(|i| commit(&format!("c{i}"), "alice@x.com", 100 + i, &[("a.rs", 1, 0)]))
            .collect();
        let provider = FakeProvider::with_commits(commits);
        let seen = Mutex::new(Vec::new());
        let sink = |msg: String| seen.lock().unwrap().push(msg);
        let settings = StatsSettings {
            progress_every: 2,
            progress_interval: Duration::from_secs(3600),
            ..StatsSettings::default()
        };

        aggregate(&provider, Path::new("."), "main", &DateRange::new(), &settings, &sink).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Processed 2 commits...", "Processed 4 commits..."]
        );
    }
}
