use super::{BlameIter, CommitIter, GitLogProvider, RawLog};
use crate::error::{GcontribError, Result};
use crate::model::{BlameLine, CommitEntry, FileChange};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory provider for unit tests.
#[derive(Default)]
pub struct FakeProvider {
    commits: Mutex<Vec<CommitEntry>>,
    pub files: Vec<String>,
    pub blame: HashMap<String, Vec<BlameLine>>,
    pub broken_files: Vec<String>,
    pub bad_commits: Vec<String>,
    pub fail_streams: bool,
    /// Commit stream dies with an I/O error after this many items.
    pub fail_after: Option<usize>,
    pub delay: Option<Duration>,
    pub raw_log_calls: AtomicUsize,
    pub blame_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn with_commits(commits: Vec<CommitEntry>) -> Self {
        Self {
            commits: Mutex::new(commits),
            ..Self::default()
        }
    }

    /// Adds a commit on top of the history (newest first).
    pub fn push_commit(&self, commit: CommitEntry) {
        self.commits.lock().unwrap().insert(0, commit);
    }

    fn render_raw_log(&self) -> String {
        let mut out = String::new();
        for c in self.commits.lock().unwrap().iter() {
            out.push_str(&format!(
                "COMMIT|{}|{}|{}|{}\n",
                c.hash,
                c.author_name,
                c.author_email,
                c.author_time.timestamp()
            ));
            for f in &c.files {
                if f.is_binary {
                    out.push_str(&format!("-\t-\t{}\n", f.path));
                } else {
                    out.push_str(&format!("{}\t{}\t{}\n", f.added_lines, f.deleted_lines, f.path));
                }
            }
            out.push('\n');
        }
        out
    }

    fn check(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_streams {
            return Err(GcontribError::GitCommand("fake stream failure".to_string()));
        }
        Ok(())
    }
}

impl GitLogProvider for FakeProvider {
    fn stream_commit_stats(&self, _path: &Path, _branch: &str) -> Result<CommitIter<'_>> {
        self.check()?;
        let mut items: Vec<Result<CommitEntry>> = self
            .commits
            .lock()
            .unwrap()
            .iter()
            .map(|c| {
                if self.bad_commits.contains(&c.hash) {
                    Err(GcontribError::Parse(format!("bad commit {}", c.hash)))
                } else {
                    Ok(c.clone())
                }
            })
            .collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(GcontribError::Io(std::io::Error::other("git log died"))));
        }
        Ok(Box::new(items.into_iter()))
    }

    fn stream_raw_log(&self, _path: &Path, _branch: &str) -> Result<RawLog> {
        self.raw_log_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(Box::new(Cursor::new(self.render_raw_log().into_bytes())))
    }

    fn list_files(&self, _path: &Path, _branch: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.files.clone())
    }

    fn stream_blame(&self, _path: &Path, _branch: &str, file: &str) -> Result<BlameIter<'_>> {
        self.blame_calls.fetch_add(1, Ordering::SeqCst);
        let mut lines: Vec<Result<BlameLine>> = self
            .blame
            .get(file)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Ok)
            .collect();
        if self.broken_files.iter().any(|f| f == file) {
            lines.push(Err(GcontribError::Io(std::io::Error::other("blame died"))));
        }
        Ok(Box::new(lines.into_iter()))
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

pub fn commit(hash: &str, email: &str, secs: i64, files: &[(&str, u32, u32)]) -> CommitEntry {
    let name = email.split('@').next().unwrap_or(email);
    CommitEntry {
        hash: hash.to_string(),
        author_name: name.to_string(),
        author_email: email.to_string(),
        author_time: ts(secs),
        parent_count: 1,
        files: files
            .iter()
            .map(|(path, added, deleted)| FileChange {
                path: path.to_string(),
                added_lines: *added,
                deleted_lines: *deleted,
                is_binary: false,
            })
            .collect(),
    }
}

pub fn blame_line(email: &str, secs: i64, text: &str) -> BlameLine {
    BlameLine {
        author_name: email.split('@').next().unwrap_or(email).to_string(),
        author_email: email.to_string(),
        author_time: ts(secs),
        text: text.to_string(),
    }
}
