use crate::error::{GcontribError, Result};
use crate::ingest::DEFAULT_BATCH_SIZE;
use crate::model::Strategy;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "gcontrib.toml";
const SEARCH_DIRS: [&str; 3] = [".", "./conf", "../conf"];
const DEFAULT_DB_DIR: &str = ".gcontrib";
const DEFAULT_DB_FILE: &str = "stats.db";

pub const ENV_DB_PATH: &str = "GCONTRIB_DB_PATH";
pub const ENV_BLAME_WORKERS: &str = "GCONTRIB_BLAME_WORKERS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub stats: StatsSettings,
    pub ingest: IngestSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    pub strategy: Strategy,
    /// How long a computed entry is served before a new call recomputes it.
    #[serde(deserialize_with = "humantime_duration")]
    pub cache_ttl: Duration,
    /// Upper bound on concurrently running `git blame` processes.
    pub blame_workers: usize,
    pub progress_every: usize,
    #[serde(deserialize_with = "humantime_duration")]
    pub progress_interval: Duration,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fast,
            cache_ttl: Duration::from_secs(60 * 60),
            blame_workers: 10,
            progress_every: 100,
            progress_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub batch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn humantime_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Settings {
    /// Loads `explicit` when given, otherwise the first `gcontrib.toml` in
    /// the search directories, falling back to defaults. Environment
    /// overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::discover() {
                Some(path) => Self::from_file(&path)?,
                None => {
                    info!("no {CONFIG_FILE_NAME} found, using defaults");
                    Self::default()
                }
            },
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    fn discover() -> Option<PathBuf> {
        SEARCH_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            GcontribError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_BLAME_WORKERS) {
            self.stats.blame_workers = raw.trim().parse().map_err(|_| {
                GcontribError::Config(format!("{ENV_BLAME_WORKERS} must be a positive integer, got '{raw}'"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stats.blame_workers == 0 {
            return Err(GcontribError::Config("stats.blame_workers must be at least 1".to_string()));
        }
        if self.stats.cache_ttl.is_zero() {
            return Err(GcontribError::Config("stats.cache_ttl must be longer than zero".to_string()));
        }
        if self.ingest.batch_size == 0 {
            return Err(GcontribError::Config("ingest.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The configured database, or `<repo>/.gcontrib/stats.db`.
    pub fn database_path(&self, repo_root: &Path) -> PathBuf {
        match &self.database.path {
            Some(path) => path.clone(),
            None => repo_root.join(DEFAULT_DB_DIR).join(DEFAULT_DB_FILE),
        }
    }
}
