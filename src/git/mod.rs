pub mod cli;
pub mod parse;
pub mod repo;

#[cfg(test)]
pub(crate) mod fake;

pub use cli::GitCli;
pub use repo::GitRepo;

use crate::error::Result;
use crate::model::{BlameLine, CommitEntry};
use std::io::BufRead;
use std::path::Path;

pub type CommitIter<'a> = Box<dyn Iterator<Item = Result<CommitEntry>> + Send + 'a>;
pub type BlameIter<'a> = Box<dyn Iterator<Item = Result<BlameLine>> + Send + 'a>;
pub type RawLog = Box<dyn BufRead + Send>;

/// Source of commit history and line attribution for a repository.
///
/// Every stream is finite and single-pass. Errors returned when opening a
/// stream are fatal to the calling operation; `Parse` errors yielded by a
/// stream concern one item only.
pub trait GitLogProvider: Send + Sync {
    /// Commits reachable from `branch`, newest first, with per-file
    /// added/deleted counts.
    fn stream_commit_stats(&self, path: &Path, branch: &str) -> Result<CommitIter<'_>>;

    /// Alternating `COMMIT|<hash>|<name>|<email>|<unix>` header lines and
    /// `<added>\t<deleted>\t<path>` numstat lines.
    fn stream_raw_log(&self, path: &Path, branch: &str) -> Result<RawLog>;

    /// Files tracked at the tip of `branch`.
    fn list_files(&self, path: &Path, branch: &str) -> Result<Vec<String>>;

    fn stream_blame(&self, path: &Path, branch: &str, file: &str) -> Result<BlameIter<'_>>;
}
