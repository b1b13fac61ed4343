use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::HarvestError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HarvestSeverity {
    /// Informational event.
    Info,
    /// Non-fatal event (best-effort step failed, file skipped).
    Warning,
    /// The file's harvest failed.
    Error,
    /// Infrastructure failure (I/O, transport).
    Critical,
}

impl HarvestSeverity {
    /// Severity assigned to a failed harvest caused by `error`.
    pub fn of(error: &HarvestError) -> Self {
        match error {
            HarvestError::UnsupportedFormat { .. } | HarvestError::DetectionExhausted { .. } => {
                HarvestSeverity::Warning
            }
            HarvestError::Io(_) | HarvestError::NoResponse { .. } => HarvestSeverity::Critical,
            HarvestError::TotalUploadFailure { .. } => HarvestSeverity::Critical,
            _ => HarvestSeverity::Error,
        }
    }
}

/// Which file a callback is about.
#[derive(Debug, Clone)]
pub struct HarvestContext {
    /// The file being harvested.
    pub path: PathBuf,
    /// Identifier of the monitored path owning the file.
    pub monitored_path_id: String,
}

impl HarvestContext {
    pub fn new(path: impl Into<PathBuf>, monitored_path_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            monitored_path_id: monitored_path_id.into(),
        }
    }
}

/// Observer interface for harvest progress.
///
/// Implementors can record metrics, logs, or trigger alerts. Every method has an empty default.
pub trait HarvestObserver: Send + Sync {
    /// A capability accepted the file.
    fn on_detected(&self, _ctx: &HarvestContext, _capability: &str) {}

    /// A stage report was accepted by the service.
    fn on_stage(&self, _ctx: &HarvestContext, _stage: &str) {}

    /// The file was not harvested this pass.
    fn on_skipped(&self, _ctx: &HarvestContext, _reason: &str) {}

    /// A best-effort step failed without failing the harvest.
    fn on_warning(&self, _ctx: &HarvestContext, _message: &str) {}

    /// The harvest of a file failed.
    fn on_failure(&self, _ctx: &HarvestContext, _severity: HarvestSeverity, _error: &HarvestError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Notify `observer` of a failure, escalating to `on_alert` at or above `threshold`.
pub fn notify_failure(
    observer: &dyn HarvestObserver,
    ctx: &HarvestContext,
    error: &HarvestError,
    threshold: HarvestSeverity,
) {
    let severity = HarvestSeverity::of(error);
    if severity >= threshold {
        observer.on_alert(ctx, severity, error);
    } else {
        observer.on_failure(ctx, severity, error);
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn HarvestObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn HarvestObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl HarvestObserver for CompositeObserver {
    fn on_detected(&self, ctx: &HarvestContext, capability: &str) {
        for o in &self.observers {
            o.on_detected(ctx, capability);
        }
    }

    fn on_stage(&self, ctx: &HarvestContext, stage: &str) {
        for o in &self.observers {
            o.on_stage(ctx, stage);
        }
    }

    fn on_skipped(&self, ctx: &HarvestContext, reason: &str) {
        for o in &self.observers {
            o.on_skipped(ctx, reason);
        }
    }

    fn on_warning(&self, ctx: &HarvestContext, message: &str) {
        for o in &self.observers {
            o.on_warning(ctx, message);
        }
    }

    fn on_failure(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl HarvestObserver for TracingObserver {
    fn on_detected(&self, ctx: &HarvestContext, capability: &str) {
        tracing::debug!(path = %ctx.path.display(), capability, "format detected");
    }

    fn on_stage(&self, ctx: &HarvestContext, stage: &str) {
        tracing::info!(path = %ctx.path.display(), monitored_path = %ctx.monitored_path_id, stage, "stage reported");
    }

    fn on_skipped(&self, ctx: &HarvestContext, reason: &str) {
        tracing::debug!(path = %ctx.path.display(), reason, "file skipped");
    }

    fn on_warning(&self, ctx: &HarvestContext, message: &str) {
        tracing::warn!(path = %ctx.path.display(), "{message}");
    }

    fn on_failure(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        tracing::error!(path = %ctx.path.display(), ?severity, kind = error.kind(), "{error}");
    }

    fn on_alert(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        tracing::error!(path = %ctx.path.display(), ?severity, kind = error.kind(), alert = true, "{error}");
    }
}

/// Appends harvest events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", chrono::Utc::now().to_rfc3339());
        }
    }
}

impl HarvestObserver for FileObserver {
    fn on_stage(&self, ctx: &HarvestContext, stage: &str) {
        self.append_line(&format!(
            "stage={stage:?} monitored_path={} path={}",
            ctx.monitored_path_id,
            ctx.path.display()
        ));
    }

    fn on_skipped(&self, ctx: &HarvestContext, reason: &str) {
        self.append_line(&format!("skip path={} reason={reason}", ctx.path.display()));
    }

    fn on_warning(&self, ctx: &HarvestContext, message: &str) {
        self.append_line(&format!("warn path={} msg={message}", ctx.path.display()));
    }

    fn on_failure(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        self.append_line(&format!(
            "fail severity={severity:?} kind={} path={} err={error}",
            error.kind(),
            ctx.path.display()
        ));
    }

    fn on_alert(&self, ctx: &HarvestContext, severity: HarvestSeverity, error: &HarvestError) {
        self.append_line(&format!(
            "ALERT severity={severity:?} kind={} path={} err={error}",
            error.kind(),
            ctx.path.display()
        ));
    }
}
