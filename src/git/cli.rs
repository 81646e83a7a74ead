use super::parse::{BlameStream, CommitStream};
use super::{BlameIter, CommitIter, GitLogProvider, RawLog};
use crate::error::{GcontribError, Result};
use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::debug;

const RAW_LOG_FORMAT: &str = "--format=COMMIT|%H|%an|%ae|%at";
const COMMIT_STATS_FORMAT: &str = "--format=COMMIT|%H|%an|%ae|%at|%P";
const STDERR_TAIL_LINES: usize = 20;

/// `GitLogProvider` backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    pub fn with_program<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, repo: &Path, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-C")
            .arg(repo)
            .args(["-c", "core.quotepath=off", "--no-pager"])
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());
        cmd
    }

    fn spawn_stream<I, S>(&self, repo: &Path, args: I) -> Result<ChildStream>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let cmd = self.command(repo, args);
        debug!(command = ?cmd, "spawning git");
        ChildStream::spawn(cmd)
    }

    fn run<I, S>(&self, repo: &Path, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command(repo, args);
        debug!(command = ?cmd, "running git");
        let output = cmd
            .output()
            .map_err(|e| GcontribError::GitCommand(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            return Err(GcontribError::GitCommand(format!(
                "git exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

fn check_branch(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.starts_with('-') {
        return Err(GcontribError::GitRepo(format!(
            "Invalid branch name '{branch}'"
        )));
    }
    Ok(())
}

impl GitLogProvider for GitCli {
    fn stream_commit_stats(&self, path: &Path, branch: &str) -> Result<CommitIter<'_>> {
        check_branch(branch)?;
        let stream = self.spawn_stream(
            path,
            ["log", "--numstat", "--no-color", COMMIT_STATS_FORMAT, branch, "--"],
        )?;
        Ok(Box::new(CommitStream::new(stream)))
    }

    fn stream_raw_log(&self, path: &Path, branch: &str) -> Result<RawLog> {
        check_branch(branch)?;
        let stream = self.spawn_stream(
            path,
            ["log", "--numstat", "--no-color", RAW_LOG_FORMAT, branch, "--"],
        )?;
        Ok(Box::new(stream))
    }

    fn list_files(&self, path: &Path, branch: &str) -> Result<Vec<String>> {
        check_branch(branch)?;
        let out = self.run(path, ["ls-tree", "-r", "-z", "--name-only", branch])?;
        Ok(out
            .split(|&b| b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect())
    }

    fn stream_blame(&self, path: &Path, branch: &str, file: &str) -> Result<BlameIter<'_>> {
        check_branch(branch)?;
        let stream = self.spawn_stream(
            path,
            ["blame", "--line-porcelain", "-w", branch, "--", file],
        )?;
        Ok(Box::new(BlameStream::new(stream)))
    }
}

/// Stdout of a running git process. Reaching EOF reaps the child and turns
/// a failed exit status into an I/O error; dropping the stream early kills
/// the child.
///
/// Stderr is drained on its own thread so a chatty child never blocks on a
/// full pipe while we are still reading stdout.
pub struct ChildStream {
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl ChildStream {
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| GcontribError::GitCommand(format!("failed to spawn git: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GcontribError::GitCommand("git stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        Ok(Self {
            child,
            reader: BufReader::with_capacity(64 * 1024, stdout),
            stderr,
            finished: false,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        Err(io::Error::other(format!(
            "git exited with {status}: {}",
            stderr_tail(&stderr)
        )))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl Read for ChildStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finish()?;
        }
        Ok(n)
    }
}

impl BufRead for ChildStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.reader.fill_buf()?.is_empty() {
            self.finish()?;
        }
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt);
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        // the pipe closes once the child is gone, so this join cannot hang
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_option_like_branches() {
        assert!(check_branch("--output=/tmp/x").is_err());
        assert!(check_branch("").is_err());
        assert!(check_branch("main").is_ok());
        assert!(check_branch("origin/feature-1").is_ok());
    }

    #[test]
    fn missing_program_fails_to_open_stream() {
        let git = GitCli::with_program("/nonexistent/git-binary");
        let err = git
            .stream_raw_log(Path::new("."), "HEAD")
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, GcontribError::GitCommand(_)));
        assert!(!err.is_item_level());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let noisy: String = (0..50).map(|i| format!("warning {i}\n")).collect();
        let tail = stderr_tail(&noisy);
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.starts_with("warning 30"));
        assert!(tail.ends_with("warning 49"));
    }

    #[cfg(unix)]
    #[test]
    fn noisy_stderr_does_not_stall_stdout() {
        // ~90KB of stderr, well past a pipe buffer, before anything on stdout
        let mut cmd = Command::new("sh");
        cmd.args([
            "-c",
            "i=0; while [ $i -lt 4000 ]; do echo \"warning: skipped entry $i\" >&2; i=$((i+1)); done; echo done; exit 3",
        ]);
        let mut stream = ChildStream::spawn(cmd).unwrap();

        let mut out = String::new();
        let err = stream.read_to_string(&mut out).unwrap_err();
        assert_eq!(out, "done\n");
        let message = err.to_string();
        assert!(message.contains("exited"));
        assert!(message.contains("warning: skipped entry 3999"));
        assert!(!message.contains("warning: skipped entry 0\n"));
    }
}
