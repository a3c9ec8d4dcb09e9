// Core types
pub mod types;
pub use types::*;

// Logging functionality
pub mod logger;

// Merged lock-order tree
pub mod tree;

// Inspection pipeline
pub mod inspector;
pub use inspector::{Inspector, InspectorConfig, InspectorHandle};

// Instrumented locks
pub mod locks;
pub use locks::mutex::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use inspector::AnomalyCallback;
use inspector::report_stage::ReportCallback;
use logger::EventLogger;
use std::sync::Arc;
use std::time::Duration;

/// Nesting depth above which a thread is reported
pub const DEFAULT_MAX_DEPTH: usize = 1000;

/// Minimum time between two collision analyses
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Lock inspector configuration builder
pub struct LockInspector {
    log_path: Option<String>,
    callback: ReportCallback,
    anomaly_callback: Option<AnomalyCallback>,
    max_depth: usize,
    report_interval: Duration,
}

impl Default for LockInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl LockInspector {
    /// Create a new builder with default settings
    ///
    /// By default:
    /// - Logging to a file is disabled
    /// - Reports are summarized through `log::warn!`
    /// - Anomalies are only logged
    /// - Maximum depth is [`DEFAULT_MAX_DEPTH`], report interval is
    ///   [`DEFAULT_REPORT_INTERVAL`]
    pub fn new() -> Self {
        LockInspector {
            log_path: None,
            callback: Arc::new(|report: CollisionReport| {
                for entry in &report.entries {
                    log::warn!(
                        "lock order {:x?} conflicts with {} other order(s)",
                        entry.branch.locks(),
                        entry.degree()
                    );
                }
            }),
            anomaly_callback: None,
            max_depth: DEFAULT_MAX_DEPTH,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// Activate the JSON-lines log and set its path
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Set the callback invoked with every collision report
    ///
    /// Runs on the report thread; only reports with at least one colliding
    /// pair are delivered.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(CollisionReport) + Send + Sync + 'static,
    {
        self.callback = Arc::new(callback);
        self
    }

    /// Set a callback invoked with every anomaly (lock order violation,
    /// unbalanced unlock, depth overflow)
    ///
    /// Runs on the event thread, so it should return quickly.
    pub fn on_anomaly<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Anomaly) + Send + Sync + 'static,
    {
        self.anomaly_callback = Some(Arc::new(callback));
        self
    }

    /// Set the nesting depth above which a thread is flagged
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the minimum time between two collision analyses
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Start the inspector with the configured settings
    ///
    /// # Errors
    /// Returns an error if the log file cannot be created or a pipeline
    /// thread cannot be spawned
    pub fn start(self) -> Result<Inspector> {
        let logger = match self.log_path {
            Some(path) => Some(Arc::new(
                EventLogger::with_file(path).context("Failed to initialize logger")?,
            )),
            None => None,
        };

        Inspector::start(InspectorConfig {
            max_depth: self.max_depth,
            report_interval: self.report_interval,
            callback: self.callback,
            anomaly_callback: self.anomaly_callback,
            logger,
        })
        .context("Failed to start lock inspector")
    }
}
