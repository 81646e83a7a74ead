//! Single-flight cache of statistics computations keyed by request
//! fingerprint.
//!
//! Each entry publishes immutable [`StatsSnapshot`]s through a `watch`
//! channel. The first caller for a fresh fingerprint installs the entry and
//! starts the computation on the blocking pool; everyone else, including
//! callers that poll later, reads the same entry until its TTL lapses.

use crate::config::StatsSettings;
use crate::error::{GcontribError, Result};
use crate::git::GitLogProvider;
use crate::model::{StatsResult, StatsStatus, Strategy};
use crate::stats::{compute_stats, StatsRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const INITIAL_PROGRESS: &str = "Initializing...";
pub const COMPLETED_PROGRESS: &str = "Completed";

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub status: StatsStatus,
    pub progress: String,
    pub result: Option<Arc<StatsResult>>,
    pub error: Option<String>,
}

impl StatsSnapshot {
    fn processing() -> Self {
        Self {
            status: StatsStatus::Processing,
            progress: INITIAL_PROGRESS.to_string(),
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub struct CacheEntry {
    fingerprint: String,
    created_at: Instant,
    state: watch::Sender<StatsSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEntry {
    fn new(fingerprint: &str) -> Self {
        let (state, _) = watch::channel(StatsSnapshot::processing());
        Self {
            fingerprint: fingerprint.to_string(),
            created_at: Instant::now(),
            state,
            task: Mutex::new(None),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }

    /// Ignored once the entry is ready or failed.
    pub fn report_progress(&self, progress: String) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.is_terminal() {
                return false;
            }
            snapshot.progress = progress;
            true
        });
    }

    /// Moves the entry to `ready` or `failed`. Returns false if it already
    /// was terminal.
    pub fn complete(&self, outcome: Result<StatsResult>) -> bool {
        self.state.send_if_modified(move |snapshot| {
            if snapshot.is_terminal() {
                return false;
            }
            match outcome {
                Ok(result) => {
                    snapshot.status = StatsStatus::Ready;
                    snapshot.progress = COMPLETED_PROGRESS.to_string();
                    snapshot.result = Some(Arc::new(result));
                }
                Err(e) => {
                    snapshot.status = StatsStatus::Failed;
                    snapshot.error = Some(e.to_string());
                }
            }
            true
        })
    }

    /// Resolves with the first terminal snapshot.
    pub async fn wait(&self) -> StatsSnapshot {
        let mut rx = self.state.subscribe();
        let outcome = rx.wait_for(|snapshot| snapshot.is_terminal()).await;
        match outcome {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn attach(&self, handle: JoinHandle<()>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        *task = Some(handle);
    }

    pub fn is_running(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        task.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

pub struct ComputationCache {
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    ttl: Duration,
}

impl ComputationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the live entry for `fingerprint`, installing a new one when
    /// there is none or it has expired. The flag is true for the installer.
    /// Installing also drops other expired entries.
    pub fn get_or_install(&self, fingerprint: &str) -> (Arc<CacheEntry>, bool) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(fingerprint) {
            if entry.is_fresh(self.ttl) {
                return (Arc::clone(entry), false);
            }
            debug!(fingerprint, "cache entry expired");
        }
        let purged = prune(&mut entries, self.ttl);
        if purged > 0 {
            debug!(purged, "dropped expired cache entries");
        }
        let entry = Arc::new(CacheEntry::new(fingerprint));
        entries.insert(fingerprint.to_string(), Arc::clone(&entry));
        (entry, true)
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<CacheEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(fingerprint)
            .filter(|entry| entry.is_fresh(self.ttl))
            .cloned()
    }

    /// Drops expired entries whose computation has finished.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut entries, self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(entries: &mut HashMap<String, Arc<CacheEntry>>, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(ttl) || entry.is_running());
    before - entries.len()
}

pub struct StatsService {
    provider: Arc<dyn GitLogProvider>,
    cache: ComputationCache,
    settings: StatsSettings,
    runtime: Handle,
}

impl StatsService {
    pub fn new(provider: Arc<dyn GitLogProvider>, settings: StatsSettings, runtime: Handle) -> Self {
        Self {
            provider,
            cache: ComputationCache::new(settings.cache_ttl),
            settings,
            runtime,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.settings.strategy
    }

    pub fn cache(&self) -> &ComputationCache {
        &self.cache
    }

    /// Never blocks: returns whatever the entry for `request` currently
    /// holds, starting a computation first if needed.
    pub fn get_stats(&self, request: &StatsRequest) -> StatsSnapshot {
        self.entry(request).snapshot()
    }

    pub async fn wait(&self, request: &StatsRequest) -> StatsSnapshot {
        let entry = self.entry(request);
        entry.wait().await
    }

    /// The entry serving `request`, starting its computation if needed.
    /// Holding on to it keeps observing that one computation even after the
    /// cache has moved on to a newer entry.
    pub fn entry(&self, request: &StatsRequest) -> Arc<CacheEntry> {
        let fingerprint = request.fingerprint();
        let (entry, installed) = self.cache.get_or_install(&fingerprint);
        if installed {
            self.dispatch(&entry, request.clone());
        }
        entry
    }

    fn dispatch(&self, entry: &Arc<CacheEntry>, request: StatsRequest) {
        let provider = Arc::clone(&self.provider);
        let settings = self.settings.clone();
        let worker_entry = Arc::clone(entry);
        info!(
            fingerprint = entry.fingerprint(),
            strategy = %settings.strategy,
            "starting stats computation"
        );

        let computation = self.runtime.spawn_blocking(move || {
            let progress = |message: String| worker_entry.report_progress(message);
            let outcome = compute_stats(
                provider.as_ref(),
                settings.strategy,
                &request,
                &settings,
                &progress,
            );
            match &outcome {
                Ok(result) => info!(
                    fingerprint = worker_entry.fingerprint(),
                    authors = result.authors.len(),
                    total_lines = result.total_lines,
                    "stats computation completed"
                ),
                Err(e) => error!(
                    fingerprint = worker_entry.fingerprint(),
                    error = %e,
                    "stats computation failed"
                ),
            }
            worker_entry.complete(outcome);
        });

        let watcher_entry = Arc::clone(entry);
        let handle = self.runtime.spawn(async move {
            if let Err(e) = computation.await {
                error!(fingerprint = watcher_entry.fingerprint(), error = %e, "stats task died");
                watcher_entry.complete(Err(GcontribError::Task(e.to_string())));
            }
        });
        entry.attach(handle);
    }
}
