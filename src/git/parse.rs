//! Line parsers for the text formats produced by the git subprocesses:
//! `COMMIT|<hash>|<name>|<email>|<unix>[|<parents>]` headers followed by
//! numstat lines, and `git blame --line-porcelain` output.

use crate::error::{GcontribError, Result};
use crate::model::{BlameLine, CommitEntry, FileChange};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead};

pub const COMMIT_MARKER: &str = "COMMIT|";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitHeader {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<Utc>,
    pub parent_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Header(CommitHeader),
    NumStat(FileChange),
    Other,
}

pub fn parse_log_line(line: &str) -> Result<LogLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix(COMMIT_MARKER) {
        return parse_header(rest).map(LogLine::Header);
    }
    if line.trim().is_empty() {
        return Ok(LogLine::Other);
    }
    Ok(parse_numstat(line).map_or(LogLine::Other, LogLine::NumStat))
}

fn parse_header(rest: &str) -> Result<CommitHeader> {
    let fields: Vec<&str> = rest.split('|').collect();
    if fields.len() < 4 {
        return Err(GcontribError::Parse(format!(
            "Malformed commit header: COMMIT|{rest}"
        )));
    }

    let secs: i64 = fields[3].trim().parse().map_err(|_| {
        GcontribError::Parse(format!(
            "Invalid timestamp '{}' for commit {}",
            fields[3], fields[0]
        ))
    })?;
    let author_time = DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| GcontribError::Parse(format!("Timestamp out of range: {secs}")))?;

    Ok(CommitHeader {
        hash: fields[0].trim().to_string(),
        author_name: fields[1].to_string(),
        author_email: fields[2].to_string(),
        author_time,
        parent_count: fields
            .get(4)
            .map(|p| p.split_whitespace().count())
            .unwrap_or(0),
    })
}

/// `<added>\t<deleted>\t<path>`. Non-numeric counts (`-` for binary files)
/// yield a binary change with zero lines.
pub fn parse_numstat(line: &str) -> Option<FileChange> {
    let (added, deleted, path) = if line.contains('\t') {
        let mut parts = line.splitn(3, '\t');
        (parts.next()?, parts.next()?, parts.next()?)
    } else {
        let (added, rest) = split_field(line)?;
        let (deleted, path) = split_field(rest)?;
        (added, deleted, path)
    };

    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let change = match (added.trim().parse::<u32>(), deleted.trim().parse::<u32>()) {
        (Ok(added_lines), Ok(deleted_lines)) => FileChange {
            path: path.to_string(),
            added_lines,
            deleted_lines,
            is_binary: false,
        },
        _ => FileChange {
            path: path.to_string(),
            added_lines: 0,
            deleted_lines: 0,
            is_binary: true,
        },
    };
    Some(change)
}

fn split_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let idx = s.find(char::is_whitespace)?;
    Some((&s[..idx], s[idx..].trim_start()))
}

/// Groups a header/numstat line stream into commits, lazily.
///
/// A malformed header yields one `Parse` error and the numstat lines that
/// follow it are dropped until the next valid header. I/O errors end the
/// stream.
pub struct CommitStream<R> {
    lines: io::Split<R>,
    pending: Option<CommitEntry>,
    outbox: VecDeque<Result<CommitEntry>>,
    done: bool,
}

impl<R: BufRead> CommitStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.split(b'\n'),
            pending: None,
            outbox: VecDeque::new(),
            done: false,
        }
    }

    fn advance(&mut self) {
        let bytes = match self.lines.next() {
            None => {
                self.done = true;
                if let Some(commit) = self.pending.take() {
                    self.outbox.push_back(Ok(commit));
                }
                return;
            }
            Some(Err(e)) => {
                self.done = true;
                self.pending = None;
                self.outbox.push_back(Err(e.into()));
                return;
            }
            Some(Ok(bytes)) => bytes,
        };

        let line = String::from_utf8_lossy(&bytes);
        match parse_log_line(&line) {
            Ok(LogLine::Header(header)) => {
                let next = CommitEntry {
                    hash: header.hash,
                    author_name: header.author_name,
                    author_email: header.author_email,
                    author_time: header.author_time,
                    parent_count: header.parent_count,
                    files: Vec::new(),
                };
                if let Some(prev) = self.pending.replace(next) {
                    self.outbox.push_back(Ok(prev));
                }
            }
            Ok(LogLine::NumStat(change)) => {
                if let Some(commit) = self.pending.as_mut() {
                    commit.files.push(change);
                }
            }
            Ok(LogLine::Other) => {}
            Err(e) => {
                if let Some(prev) = self.pending.take() {
                    self.outbox.push_back(Ok(prev));
                }
                self.outbox.push_back(Err(e));
            }
        }
    }
}

impl<R: BufRead> Iterator for CommitStream<R> {
    type Item = Result<CommitEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.outbox.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            self.advance();
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BlameAuthor {
    name: String,
    email: String,
    time: Option<DateTime<Utc>>,
}

/// Parses `git blame --porcelain` / `--line-porcelain` into one item per
/// line of the blamed file. Author metadata is remembered per commit so the
/// abbreviated porcelain form works too.
pub struct BlameStream<R> {
    lines: io::Split<R>,
    authors: HashMap<String, BlameAuthor>,
    current: Option<String>,
    done: bool,
}

impl<R: BufRead> BlameStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.split(b'\n'),
            authors: HashMap::new(),
            current: None,
            done: false,
        }
    }

    fn emit(&self, text: &str) -> Result<BlameLine> {
        let hash = self
            .current
            .as_deref()
            .ok_or_else(|| GcontribError::Parse("Blame content before header".to_string()))?;
        let author = self.authors.get(hash).cloned().unwrap_or_default();
        let author_time = author.time.ok_or_else(|| {
            GcontribError::Parse(format!("Blame entry for {hash} has no author-time"))
        })?;
        Ok(BlameLine {
            author_name: author.name,
            author_email: author.email,
            author_time,
            text: text.to_string(),
        })
    }
}

fn is_blame_header(line: &str) -> Option<&str> {
    let hash = line.split(' ').next()?;
    let is_hash = matches!(hash.len(), 40 | 64) && hash.chars().all(|c| c.is_ascii_hexdigit());
    (is_hash && line.split(' ').count() >= 3).then_some(hash)
}

impl<R: BufRead> Iterator for BlameStream<R> {
    type Item = Result<BlameLine>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let bytes = match self.lines.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Some(Ok(bytes)) => bytes,
            };
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches('\r');

            if let Some(text) = line.strip_prefix('\t') {
                return Some(self.emit(text));
            }
            if let Some(hash) = is_blame_header(line) {
                self.authors.entry(hash.to_string()).or_default();
                self.current = Some(hash.to_string());
                continue;
            }

            let Some(hash) = self.current.as_deref() else {
                continue;
            };
            let Some(author) = self.authors.get_mut(hash) else {
                continue;
            };
            if let Some(name) = line.strip_prefix("author ") {
                author.name = name.to_string();
            } else if let Some(mail) = line.strip_prefix("author-mail ") {
                author.email = mail.trim_start_matches('<').trim_end_matches('>').to_string();
            } else if let Some(secs) = line.strip_prefix("author-time ") {
                author.time = secs
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0));
            }
        }
        None
    }
}
