use chrono::{DateTime, Utc};
use std::path::Path;

pub const UNKNOWN_EXTENSION: &str = "unknown";

/// Line prefixes treated as comments by the blame strategy. This is a
/// language-agnostic approximation: a code line that happens to start with
/// `*` or `#` is dropped as well.
pub const COMMENT_PREFIXES: [&str; 5] = ["//", "#", "--", "/*", "*"];

pub fn day_key(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

/// Lower-cased extension without the dot, or `"unknown"`.
pub fn extension_bucket(path: &str) -> String {
    let path = resolve_rename_path(path);
    Path::new(&path)
        .extension()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string())
}

/// Numstat reports renames as `old => new` or `dir/{old => new}/file`.
/// Returns the destination path; other paths are returned unchanged.
pub fn resolve_rename_path(path: &str) -> String {
    if !path.contains(" => ") {
        return path.to_string();
    }

    if let (Some(open), Some(close)) = (path.find('{'), path.rfind('}')) {
        if open < close {
            let inner = &path[open + 1..close];
            if let Some((_, new)) = inner.split_once(" => ") {
                let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
                return joined.replace("//", "/");
            }
        }
    }

    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}

pub fn is_effective_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}
