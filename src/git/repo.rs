use crate::error::{GcontribError, Result};
use chrono::{DateTime, Utc};
use gix::{discover, Repository};
use std::path::{Path, PathBuf};

pub struct GitRepo {
    repo: Repository,
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTip {
    pub branch: String,
    pub commit_id: String,
    pub timestamp: DateTime<Utc>,
}

impl GitRepo {
    /// Open a repository at `path`, or current dir if `None`
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let repo_path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or(std::env::current_dir()?);

        let repo = discover(&repo_path)?;
        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();

        Ok(Self { repo, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves `branch` (any revision git understands) to the commit at
    /// its tip.
    pub fn resolve_branch(&self, branch: &str) -> Result<BranchTip> {
        let id = self
            .repo
            .rev_parse_single(branch)
            .map_err(|e| GcontribError::GitRepo(format!("Unknown branch '{branch}': {e}")))?;

        let commit = id
            .object()?
            .try_into_commit()
            .map_err(|_| GcontribError::GitRepo(format!("Not a commit: {branch}")))?;

        let secs = commit.time()?.seconds;
        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| GcontribError::InvalidDate(format!("Invalid timestamp: {secs}")))?;

        Ok(BranchTip {
            branch: branch.to_string(),
            commit_id: commit.id.to_string(),
            timestamp,
        })
    }
}
