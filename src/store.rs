use crate::error::{GcontribError, Result};
use crate::model::{AuthorTotals, CommitStatRecord, DateRange, SCHEMA_VERSION};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;

/// Durable per-commit statistics.
pub trait CommitStatStore {
    /// Latest ingested commit time for the repository, `None` when empty.
    fn find_latest_commit_time(&self, repo_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Idempotent under duplicate `(repo_id, commit_hash)` pairs.
    fn batch_upsert(&mut self, records: &[CommitStatRecord]) -> Result<usize>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS commit_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL,
                commit_hash TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                commit_time INTEGER NOT NULL,
                additions INTEGER NOT NULL,
                deletions INTEGER NOT NULL,
                UNIQUE (repo_id, commit_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_commit_stats_time ON commit_stats(repo_id, commit_time);
            CREATE INDEX IF NOT EXISTS idx_commit_stats_email ON commit_stats(author_email);
            ",
        )?;
        self.check_schema_version()?;
        Ok(())
    }

    fn check_schema_version(&mut self) -> Result<()> {
        let user_version: i64 = self
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))?;

        if user_version == 0 {
            let set_stmt = format!("PRAGMA user_version = {SCHEMA_VERSION};");
            self.conn.execute_batch(&set_stmt)?;
        } else if user_version != SCHEMA_VERSION as i64 {
            return Err(GcontribError::Store(format!(
                "Schema version mismatch: expected {}, found {}",
                SCHEMA_VERSION, user_version
            )));
        }

        Ok(())
    }

    pub fn count_commits(&self, repo_id: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commit_stats WHERE repo_id = ?",
            params![repo_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Additions, deletions and commit count per author email, largest net
    /// contribution first.
    pub fn author_totals(&self, repo_id: i64, range: &DateRange) -> Result<Vec<AuthorTotals>> {
        let mut query = String::from(
            "SELECT MAX(author_name), author_email, COUNT(*), SUM(additions), SUM(deletions)
             FROM commit_stats
             WHERE repo_id = ?",
        );
        let mut to_bind: Vec<Box<dyn ToSql>> = vec![Box::new(repo_id)];

        if let Some(since) = &range.since {
            query.push_str(" AND commit_time >= ?");
            to_bind.push(Box::new(since.timestamp()));
        }
        if let Some(until) = &range.until {
            query.push_str(" AND commit_time <= ?");
            to_bind.push(Box::new(until.timestamp()));
        }
        query.push_str(
            " GROUP BY author_email
              ORDER BY SUM(additions) - SUM(deletions) DESC, author_email",
        );

        let mut stmt = self.conn.prepare(&query)?;
        let bind_refs: Vec<&dyn ToSql> = to_bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(bind_refs.as_slice(), |row| {
            Ok(AuthorTotals {
                author_name: row.get(0)?,
                author_email: row.get(1)?,
                commits: row.get::<_, i64>(2)? as u64,
                additions: row.get(3)?,
                deletions: row.get(4)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_record(&self, repo_id: i64, commit_hash: &str) -> Result<Option<CommitStatRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT repo_id, commit_hash, author_name, author_email, commit_time, additions, deletions
                 FROM commit_stats WHERE repo_id = ? AND commit_hash = ?",
                params![repo_id, commit_hash],
                |row| {
                    let ts: i64 = row.get(4)?;
                    Ok(CommitStatRecord {
                        repo_id: row.get(0)?,
                        commit_hash: row.get(1)?,
                        author_name: row.get(2)?,
                        author_email: row.get(3)?,
                        commit_time: timestamp_column(4, ts)?,
                        additions: row.get(5)?,
                        deletions: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

fn timestamp_column(idx: usize, ts: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single().ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            idx,
            "commit_time".to_string(),
            rusqlite::types::Type::Integer,
        )
    })
}

impl CommitStatStore for SqliteStore {
    fn find_latest_commit_time(&self, repo_id: i64) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(commit_time) FROM commit_stats WHERE repo_id = ?",
            params![repo_id],
            |row| row.get(0),
        )?;
        match latest {
            Some(ts) => Ok(Some(timestamp_column(0, ts)?)),
            None => Ok(None),
        }
    }

    fn batch_upsert(&mut self, records: &[CommitStatRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO commit_stats (
                    repo_id, commit_hash, author_name, author_email, commit_time, additions, deletions
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(repo_id, commit_hash) DO UPDATE SET
                    author_name = excluded.author_name,
                    author_email = excluded.author_email,
                    commit_time = excluded.commit_time,
                    additions = excluded.additions,
                    deletions = excluded.deletions",
            )?;
            for record in records {
                written += stmt.execute(params![
                    record.repo_id,
                    record.commit_hash,
                    record.author_name,
                    record.author_email,
                    record.commit_time.timestamp(),
                    record.additions,
                    record.deletions,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }
}
