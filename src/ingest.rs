//! Incremental, resumable ingestion of per-commit statistics.
//!
//! The checkpoint is the newest `commit_time` already stored for a
//! repository. Commits arrive newest first, so the walk stops at the first
//! commit strictly older than the checkpoint. Commits stamped exactly at the
//! checkpoint are written again; the store's upsert absorbs them.
//!
//! Nothing is written until the stream has been read to its end, and the
//! collected commits are then written oldest first. A sync that fails part
//! way leaves the checkpoint at or below every commit it did not write, so
//! the next run picks them up again.

use crate::error::Result;
use crate::git::GitLogProvider;
use crate::model::CommitStatRecord;
use crate::store::CommitStatStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checkpoint: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub written: usize,
    pub skipped: usize,
    pub batches: usize,
}

pub struct CheckpointedIngestor<'a, S: CommitStatStore> {
    provider: &'a dyn GitLogProvider,
    store: &'a mut S,
    batch_size: usize,
}

impl<'a, S: CommitStatStore> CheckpointedIngestor<'a, S> {
    pub fn new(provider: &'a dyn GitLogProvider, store: &'a mut S) -> Self {
        Self {
            provider,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn sync_repo_stats(&mut self, repo_id: i64, path: &Path, branch: &str) -> Result<SyncReport> {
        info!(repo_id, branch, "starting stats sync");
        let result = self.run(repo_id, path, branch);
        match &result {
            Ok(report) => info!(
                repo_id,
                scanned = report.scanned,
                written = report.written,
                skipped = report.skipped,
                "completed stats sync"
            ),
            Err(e) => error!(repo_id, error = %e, "stats sync aborted"),
        }
        result
    }

    fn run(&mut self, repo_id: i64, path: &Path, branch: &str) -> Result<SyncReport> {
        let checkpoint = self.store.find_latest_commit_time(repo_id)?;
        match checkpoint {
            Some(ts) => info!(repo_id, checkpoint = %ts, "resuming from checkpoint"),
            None => info!(repo_id, "no checkpoint, ingesting full history"),
        }

        let mut report = SyncReport {
            checkpoint,
            ..SyncReport::default()
        };
        let commits = self.provider.stream_commit_stats(path, branch)?;
        let mut pending: Vec<CommitStatRecord> = Vec::new();

        for item in commits {
            let commit = match item {
                Ok(commit) => commit,
                Err(e) if e.is_item_level() => {
                    warn!(repo_id, error = %e, "skipping commit");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.scanned += 1;

            if checkpoint.is_some_and(|cp| commit.author_time < cp) {
                break;
            }
            pending.push(CommitStatRecord::from_commit(repo_id, &commit));
        }

        pending.reverse();
        for batch in pending.chunks(self.batch_size) {
            self.store.batch_upsert(batch)?;
            report.written += batch.len();
            report.batches += 1;
        }
        Ok(report)
    }
}

/// Runs one sync with the default batch size.
pub fn sync_repo_stats<S: CommitStatStore>(
    provider: &dyn GitLogProvider,
    store: &mut S,
    repo_id: i64,
    path: &Path,
    branch: &str,
) -> Result<SyncReport> {
    CheckpointedIngestor::new(provider, store).sync_repo_stats(repo_id, path, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GcontribError;
    use crate::git::fake::{commit, FakeProvider};
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;

    fn history() -> FakeProvider {
        // newest first
        FakeProvider::with_commits(vec![
            commit("c", "alice@x.com", 3, &[("a.go", 3, 0)]),
            commit("b", "bob@x.com", 2, &[("a.go", 5, 2), ("b.md", 1, 0)]),
            commit("a", "alice@x.com", 1, &[("a.go", 10, 0)]),
        ])
    }

    #[derive(Default)]
    struct RecordingStore {
        rows: Vec<CommitStatRecord>,
        batch_sizes: Vec<usize>,
        fail: bool,
        /// 1-based call number of `batch_upsert` that fails once
        fail_on_call: Option<usize>,
        calls: usize,
    }

    impl CommitStatStore for RecordingStore {
        fn find_latest_commit_time(&self, _repo_id: i64) -> Result<Option<DateTime<Utc>>> {
            Ok(self.rows.iter().map(|r| r.commit_time).max())
        }

        fn batch_upsert(&mut self, records: &[CommitStatRecord]) -> Result<usize> {
            self.calls += 1;
            if self.fail || self.fail_on_call == Some(self.calls) {
                return Err(GcontribError::Store("disk full".to_string()));
            }
            self.batch_sizes.push(records.len());
            for r in records {
                self.rows.retain(|row| row.commit_hash != r.commit_hash);
                self.rows.push(r.clone());
            }
            Ok(records.len())
        }
    }

    #[test]
    fn first_sync_ingests_everything() {
        let provider = history();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let report = sync_repo_stats(&provider, &mut store, 7, Path::new("."), "main").unwrap();

        assert_eq!(report.checkpoint, None);
        assert_eq!(report.written, 3);
        assert_eq!(store.count_commits(7).unwrap(), 3);
        let b = store.get_record(7, "b").unwrap().unwrap();
        assert_eq!((b.additions, b.deletions), (6, 2));
    }

    #[test]
    fn second_sync_is_idempotent() {
        let provider = history();
        let mut store = SqliteStore::open_in_memory().unwrap();
        sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();
        let checkpoint = store.find_latest_commit_time(1).unwrap();

        let report = sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();

        assert_eq!(store.count_commits(1).unwrap(), 3);
        assert_eq!(store.find_latest_commit_time(1).unwrap(), checkpoint);
        // only the commit stamped exactly at the checkpoint is re-submitted
        assert_eq!(report.written, 1);
    }

    #[test]
    fn resumes_from_checkpoint() {
        let provider = history();
        let mut store = SqliteStore::open_in_memory().unwrap();
        sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();

        provider.push_commit(commit("d", "carol@x.com", 4, &[("c.rs", 8, 1)]));
        let report = sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();

        assert_eq!(store.count_commits(1).unwrap(), 4);
        assert_eq!(
            store.find_latest_commit_time(1).unwrap().map(|t| t.timestamp()),
            Some(4)
        );
        assert_eq!(report.checkpoint.map(|t| t.timestamp()), Some(3));
        // d is new, c ties the old checkpoint, b stops the walk
        assert_eq!(report.written, 2);
        assert_eq!(report.scanned, 3);
    }

    #[test]
    fn flushes_in_batches() {
        let provider = history();
        let mut store = RecordingStore::default();

        let report = CheckpointedIngestor::new(&provider, &mut store)
            .with_batch_size(2)
            .sync_repo_stats(1, Path::new("."), "main")
            .unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(store.batch_sizes, vec![2, 1]);
        let order: Vec<&str> = store.rows.iter().map(|r| r.commit_hash.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    fn hashes(store: &RecordingStore) -> Vec<String> {
        let mut hashes: Vec<String> = store.rows.iter().map(|r| r.commit_hash.clone()).collect();
        hashes.sort();
        hashes
    }

    #[test]
    fn failed_batch_is_recovered_by_the_next_sync() {
        let provider = history();
        let mut store = RecordingStore {
            fail_on_call: Some(2),
            ..RecordingStore::default()
        };

        let err = CheckpointedIngestor::new(&provider, &mut store)
            .with_batch_size(2)
            .sync_repo_stats(1, Path::new("."), "main")
            .unwrap_err();
        assert!(matches!(err, GcontribError::Store(_)));
        // only the oldest batch landed, so the checkpoint stays below c
        assert_eq!(hashes(&store), vec!["a", "b"]);
        assert_eq!(
            store.find_latest_commit_time(1).unwrap().map(|t| t.timestamp()),
            Some(2)
        );

        CheckpointedIngestor::new(&provider, &mut store)
            .with_batch_size(2)
            .sync_repo_stats(1, Path::new("."), "main")
            .unwrap();
        assert_eq!(hashes(&store), vec!["a", "b", "c"]);
        assert_eq!(
            store.find_latest_commit_time(1).unwrap().map(|t| t.timestamp()),
            Some(3)
        );
    }

    #[test]
    fn stream_failure_writes_nothing() {
        let mut provider = history();
        provider.fail_after = Some(2);
        let mut store = SqliteStore::open_in_memory().unwrap();

        let err = CheckpointedIngestor::new(&provider, &mut store)
            .with_batch_size(1)
            .sync_repo_stats(1, Path::new("."), "main")
            .unwrap_err();

        assert!(matches!(err, GcontribError::Io(_)));
        assert_eq!(store.count_commits(1).unwrap(), 0);
        assert_eq!(store.find_latest_commit_time(1).unwrap(), None);

        provider.fail_after = None;
        sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();
        assert_eq!(store.count_commits(1).unwrap(), 3);
    }

    #[test]
    fn broken_commits_are_skipped() {
        let mut provider = history();
        provider.bad_commits = vec!["b".to_string()];
        let mut store = RecordingStore::default();

        let report = sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.written, 2);
        assert!(store.rows.iter().all(|r| r.commit_hash != "b"));
    }

    #[test]
    fn provider_failure_leaves_checkpoint_untouched() {
        let mut provider = history();
        let mut store = SqliteStore::open_in_memory().unwrap();
        sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap();
        let checkpoint = store.find_latest_commit_time(1).unwrap();

        provider.fail_streams = true;
        let err = sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap_err();

        assert!(matches!(err, GcontribError::GitCommand(_)));
        assert_eq!(store.find_latest_commit_time(1).unwrap(), checkpoint);
        assert_eq!(store.count_commits(1).unwrap(), 3);
    }

    #[test]
    fn store_failure_aborts_sync() {
        let provider = history();
        let mut store = RecordingStore {
            fail: true,
            ..RecordingStore::default()
        };

        let err = sync_repo_stats(&provider, &mut store, 1, Path::new("."), "main").unwrap_err();
        assert!(matches!(err, GcontribError::Store(_)));
        assert!(store.rows.is_empty());
    }
}
