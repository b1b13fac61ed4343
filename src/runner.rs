//! Directory-walk driver: one harvest pass over the monitored paths.
//!
//! For every candidate file the runner dispatches a capability, asks the service whether the
//! file is ready (a `file_size` report), and runs the [`HarvestStateMachine`] when it is.
//! Files are independent; a failure in one never affects another.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use fancy_regex::Regex;
use serde_json::json;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::{HarvestOptions, HarvesterSettings, MonitoredPath};
use crate::detect::FormatRegistry;
use crate::error::{HarvestError, HarvestResult};
use crate::harvest::machine::{HarvestOutcome, HarvestStateMachine, HarvestStatus};
use crate::harvest::observer::{HarvestContext, HarvestObserver, TracingObserver};
use crate::harvest::report::{Reply, Report, Reporter, TASK_FILE_SIZE};

/// Service-assigned file states in which a file is harvested.
pub const READY_STATES: [&str; 4] = ["STABLE", "RETRY IMPORT", "MAP ASSIGNED", "AWAITING STORAGE"];

/// Configuration for the [`HarvestRunner`].
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Worker threads for processing files of one monitored path.
    ///
    /// `None` or `Some(1)` processes files sequentially on the calling thread.
    pub num_threads: Option<usize>,
    pub harvest: HarvestOptions,
}

/// Counters for a harvest pass, updated as files are processed.
#[derive(Debug, Default)]
pub struct PassStats {
    seen: AtomicU64,
    skipped: AtomicU64,
    unsupported: AtomicU64,
    not_ready: AtomicU64,
    harvested: AtomicU64,
    awaiting_mapping: AtomicU64,
    failed: AtomicU64,
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn counters(&self) -> [&AtomicU64; 7] {
        [
            &self.seen,
            &self.skipped,
            &self.unsupported,
            &self.not_ready,
            &self.harvested,
            &self.awaiting_mapping,
            &self.failed,
        ]
    }

    fn record(&self, disposition: &FileDisposition) {
        let counter = match disposition {
            FileDisposition::Hidden | FileDisposition::Filtered => &self.skipped,
            FileDisposition::Unsupported => &self.unsupported,
            FileDisposition::NotReady { .. } => &self.not_ready,
            FileDisposition::Harvested(outcome) if outcome.status == HarvestStatus::AwaitingMapping => {
                &self.awaiting_mapping
            }
            FileDisposition::Harvested(_) => &self.harvested,
            FileDisposition::Failed { .. } => &self.failed,
        };
        let _ = self.seen.fetch_add(1, Ordering::SeqCst);
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PassStatsSnapshot {
        PassStatsSnapshot {
            seen: self.seen.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            unsupported: self.unsupported.load(Ordering::SeqCst),
            not_ready: self.not_ready.load(Ordering::SeqCst),
            harvested: self.harvested.load(Ordering::SeqCst),
            awaiting_mapping: self.awaiting_mapping.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`PassStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStatsSnapshot {
    pub seen: u64,
    pub skipped: u64,
    pub unsupported: u64,
    pub not_ready: u64,
    pub harvested: u64,
    pub awaiting_mapping: u64,
    pub failed: u64,
}

impl fmt::Display for PassStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen={}, skipped={}, unsupported={}, not_ready={}, harvested={}, awaiting_mapping={}, failed={}",
            self.seen,
            self.skipped,
            self.unsupported,
            self.not_ready,
            self.harvested,
            self.awaiting_mapping,
            self.failed
        )
    }
}

/// What the runner did with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDisposition {
    /// Basename starts with `.`.
    Hidden,
    /// Relative path does not match the monitored path's regex.
    Filtered,
    /// No capability accepted the file.
    Unsupported,
    /// The service did not report a ready state.
    NotReady { state: Option<String> },
    Harvested(HarvestOutcome),
    Failed { kind: &'static str, message: String },
}

/// Runs harvest passes over monitored paths.
pub struct HarvestRunner {
    registry: FormatRegistry,
    reporter: Arc<dyn Reporter>,
    observer: Arc<dyn HarvestObserver>,
    options: RunnerOptions,
    pool: Option<ThreadPool>,
    stats: Arc<PassStats>,
}

impl HarvestRunner {
    pub fn new(
        registry: FormatRegistry,
        reporter: Arc<dyn Reporter>,
        options: RunnerOptions,
    ) -> HarvestResult<Self> {
        let pool = match options.num_threads {
            Some(0) => {
                return Err(HarvestError::Config {
                    message: "num_threads must be > 0 when set".to_string(),
                });
            }
            Some(n) if n > 1 => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| HarvestError::Config {
                        message: format!("failed to build thread pool: {e}"),
                    })?,
            ),
            _ => None,
        };
        Ok(Self {
            registry,
            reporter,
            observer: Arc::new(TracingObserver),
            options,
            pool,
            stats: Arc::new(PassStats::new()),
        })
    }

    /// Replace the default tracing observer.
    pub fn with_observer(mut self, observer: Arc<dyn HarvestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Live counters of the current pass.
    pub fn stats(&self) -> Arc<PassStats> {
        Arc::clone(&self.stats)
    }

    /// Harvest every active monitored path in `settings`.
    pub fn harvest_all(&self, settings: &HarvesterSettings) -> PassStatsSnapshot {
        info!("beginning harvest cycle");
        self.stats.reset();
        if settings.monitored_paths.is_empty() {
            info!("no paths are being monitored");
        }
        for monitored in &settings.monitored_paths {
            if !monitored.active {
                info!(path = %monitored.path.display(), "skipping inactive path");
                continue;
            }
            if let Err(e) = self.walk(monitored) {
                error!(path = %monitored.path.display(), kind = e.kind(), "{e}");
                self.reporter
                    .report(&Report::error(&monitored.path, &monitored.id, &e));
            }
        }
        self.stats.snapshot()
    }

    /// Harvest one monitored path; counters are reset first.
    pub fn harvest_path(&self, monitored: &MonitoredPath) -> HarvestResult<PassStatsSnapshot> {
        self.stats.reset();
        let result = self.walk(monitored);
        if let Err(e) = &result {
            self.reporter
                .report(&Report::error(&monitored.path, &monitored.id, e));
        }
        result.map(|()| self.stats.snapshot())
    }

    fn walk(&self, monitored: &MonitoredPath) -> HarvestResult<()> {
        let started = Instant::now();
        let filter = match &monitored.regex {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| HarvestError::Config {
                message: format!("invalid regex for monitored path '{}': {e}", monitored.id),
            })?),
            None => None,
        };
        info!(path = %monitored.path.display(), regex = ?monitored.regex, "harvesting");

        let mut files = Vec::new();
        for entry in WalkDir::new(&monitored.path).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => {
                    let err = HarvestError::Io(e.into());
                    error!(path = %monitored.path.display(), "{err}");
                    self.reporter
                        .report(&Report::error(&monitored.path, &monitored.id, &err));
                }
            }
        }

        let run = |file: &std::path::PathBuf| {
            let disposition = self.harvest_file(file, monitored, filter.as_ref());
            self.stats.record(&disposition);
        };
        match &self.pool {
            Some(pool) => pool.install(|| files.par_iter().for_each(run)),
            None => files.iter().for_each(run),
        }

        info!(
            path = %monitored.path.display(),
            files = files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completed directory walk"
        );
        Ok(())
    }

    /// Process one file found under `monitored`.
    pub fn harvest_file(
        &self,
        path: &Path,
        monitored: &MonitoredPath,
        filter: Option<&Regex>,
    ) -> FileDisposition {
        let ctx = HarvestContext::new(path, monitored.id.clone());
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
        {
            self.observer.on_skipped(&ctx, "hidden file");
            return FileDisposition::Hidden;
        }
        let relative = path.strip_prefix(&monitored.path).unwrap_or(path);
        if let Some(re) = filter {
            match re.is_match(&relative.to_string_lossy()) {
                Ok(true) => {}
                Ok(false) => {
                    self.observer.on_skipped(&ctx, "does not match regex");
                    return FileDisposition::Filtered;
                }
                Err(e) => {
                    let err = HarvestError::Config {
                        message: format!("regex for monitored path '{}' failed to match: {e}", monitored.id),
                    };
                    return self.fail(&ctx, monitored, err);
                }
            }
        }

        let capability = match self.registry.dispatch(path) {
            Ok(c) => c,
            Err(e) if e.is_unsupported() => {
                self.observer.on_skipped(&ctx, "unsupported file type");
                return FileDisposition::Unsupported;
            }
            Err(e) => return self.fail(&ctx, monitored, e),
        };

        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => return self.fail(&ctx, monitored, e.into()),
        };
        debug!(path = %relative.display(), size, "reporting stats");
        let reply = self.reporter.report(&Report::content(
            path,
            &monitored.id,
            json!({"task": TASK_FILE_SIZE, "size": size}),
        ));
        let state = match reply {
            Reply::Accepted(body) => body.get("state").and_then(|s| s.as_str()).map(str::to_string),
            _ => None,
        };
        match state.as_deref() {
            Some(s) if READY_STATES.contains(&s) => {
                info!(path = %relative.display(), state = s, "parsing file");
            }
            _ => {
                debug!(path = %relative.display(), ?state, "file not ready");
                self.observer.on_skipped(&ctx, "not ready");
                return FileDisposition::NotReady { state };
            }
        }

        let machine = HarvestStateMachine::new(
            path,
            capability,
            monitored,
            self.reporter.as_ref(),
            self.observer.as_ref(),
            &self.options.harvest,
        );
        match machine.run() {
            Ok(outcome) => FileDisposition::Harvested(outcome),
            Err(e) => FileDisposition::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    fn fail(&self, ctx: &HarvestContext, monitored: &MonitoredPath, e: HarvestError) -> FileDisposition {
        crate::harvest::observer::notify_failure(
            self.observer.as_ref(),
            ctx,
            &e,
            self.options.harvest.alert_at_or_above,
        );
        self.reporter
            .report(&Report::error(&ctx.path, &monitored.id, &e));
        FileDisposition::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Debug for HarvestRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestRunner")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("parallel", &self.pool.is_some())
            .finish()
    }
}
