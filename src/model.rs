use crate::error::{GcontribError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub added_lines: u32,
    pub deleted_lines: u32,
    pub is_binary: bool,
}

/// One commit as delivered by the provider, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<Utc>,
    pub parent_count: usize,
    pub files: Vec<FileChange>,
}

impl CommitEntry {
    pub fn additions(&self) -> i64 {
        self.files.iter().map(|f| f.added_lines as i64).sum()
    }

    pub fn deletions(&self) -> i64 {
        self.files.iter().map(|f| f.deleted_lines as i64).sum()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_count > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameLine {
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<Utc>,
    pub text: String,
}

/// Durable per-commit row, unique per `(repo_id, commit_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatRecord {
    pub repo_id: i64,
    pub commit_hash: String,
    pub author_name: String,
    pub author_email: String,
    pub commit_time: DateTime<Utc>,
    pub additions: i64,
    pub deletions: i64,
}

impl CommitStatRecord {
    pub fn from_commit(repo_id: i64, commit: &CommitEntry) -> Self {
        Self {
            repo_id,
            commit_hash: commit.hash.clone(),
            author_name: commit.author_name.clone(),
            author_email: commit.author_email.clone(),
            commit_time: commit.author_time,
            additions: commit.additions(),
            deletions: commit.deletions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorTotals {
    pub author_name: String,
    pub author_email: String,
    pub commits: u64,
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStat {
    pub name: String,
    pub email: String,
    pub total_lines: i64,
    pub file_types: BTreeMap<String, i64>,
    /// `YYYY-MM-DD` -> net lines for that day
    pub time_trend: BTreeMap<String, i64>,
}

impl AuthorStat {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn add_lines(&mut self, extension: &str, day: Option<&str>, lines: i64) {
        self.total_lines += lines;
        *self.file_types.entry(extension.to_string()).or_insert(0) += lines;
        if let Some(day) = day {
            *self.time_trend.entry(day.to_string()).or_insert(0) += lines;
        }
    }

    /// Folds another partial aggregate for the same author into this one.
    pub fn merge(&mut self, other: AuthorStat) {
        if self.name.is_empty() {
            self.name = other.name;
        }
        self.total_lines += other.total_lines;
        for (ext, lines) in other.file_types {
            *self.file_types.entry(ext).or_insert(0) += lines;
        }
        for (day, lines) in other.time_trend {
            *self.time_trend.entry(day).or_insert(0) += lines;
        }
    }
}

pub type AuthorMap = HashMap<String, AuthorStat>;

pub fn merge_author_maps(mut into: AuthorMap, from: AuthorMap) -> AuthorMap {
    for (email, stat) in from {
        match into.get_mut(&email) {
            Some(existing) => existing.merge(stat),
            None => {
                into.insert(email, stat);
            }
        }
    }
    into
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResult {
    pub total_lines: i64,
    pub authors: Vec<AuthorStat>,
}

impl StatsResult {
    pub fn from_authors(authors: AuthorMap) -> Self {
        let mut authors: Vec<AuthorStat> = authors.into_values().collect();
        authors.sort_by(|a, b| {
            b.total_lines
                .cmp(&a.total_lines)
                .then_with(|| a.email.cmp(&b.email))
        });
        let total_lines = authors.iter().map(|a| a.total_lines).sum();
        Self { total_lines, authors }
    }

    pub fn author(&self, email: &str) -> Option<&AuthorStat> {
        self.authors.iter().find(|a| a.email == email)
    }
}

/// JSON document printed by `stats --json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsOutput {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub repository_path: String,
    pub branch: String,
    pub commit_id: String,
    pub commit_time: DateTime<Utc>,
    pub strategy: Strategy,
    pub since: Option<String>,
    pub until: Option<String>,
    pub total_lines: i64,
    pub authors: Vec<AuthorStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Net line deltas streamed from `git log --numstat`
    #[default]
    Fast,
    /// Present-day line ownership from `git blame`
    Blame,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Fast => write!(f, "fast"),
            Strategy::Blame => write!(f, "blame"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsStatus {
    Processing,
    Ready,
    Failed,
}

impl StatsStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatsStatus::Processing)
    }
}

impl fmt::Display for StatsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsStatus::Processing => write!(f, "processing"),
            StatsStatus::Ready => write!(f, "ready"),
            StatsStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new() -> Self {
        Self { since: None, until: None }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Builds an inclusive range from calendar days: `since` starts at
    /// midnight UTC, `until` ends at the last nanosecond of its day.
    /// Absent or empty bounds are unbounded.
    pub fn from_days(since: Option<&str>, until: Option<&str>) -> Result<Self> {
        let mut range = DateRange::new();

        if let Some(day) = since.filter(|s| !s.trim().is_empty()) {
            let start = parse_day(day)?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| GcontribError::InvalidDate(day.to_string()))?;
            range = range.with_since(Utc.from_utc_datetime(&start));
        }

        if let Some(day) = until.filter(|s| !s.trim().is_empty()) {
            let end = parse_day(day)?
                .and_hms_nano_opt(23, 59, 59, 999_999_999)
                .ok_or_else(|| GcontribError::InvalidDate(day.to_string()))?;
            range = range.with_until(Utc.from_utc_datetime(&end));
        }

        if let (Some(s), Some(u)) = (range.since, range.until) {
            if s > u {
                return Err(GcontribError::InvalidDate(format!(
                    "Invalid range: since ({}) is after until ({})",
                    s, u
                )));
            }
        }

        Ok(range)
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        if let Some(since) = self.since {
            if timestamp < &since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if timestamp > &until {
                return false;
            }
        }
        true
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_day(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| GcontribError::InvalidDate(format!("'{input}' is not YYYY-MM-DD: {e}")))
}
