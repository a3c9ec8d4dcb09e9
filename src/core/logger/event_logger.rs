//! Asynchronous JSON-lines log of anomalies and collision reports
//!
//! Records are handed to a dedicated writer thread over a channel so the
//! pipeline stages never block on file I/O. Each record is one line of JSON.

use crate::core::types::{Anomaly, CollisionReport};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// A lock-usage anomaly found by the event stage
    Anomaly(Anomaly),
    /// A non-empty collision analysis result
    CollisionReport(CollisionReport),
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write a record to the file
    Record(LogRecord),
    /// Flush all pending records to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger writing [`LogRecord`]s to a file
///
/// Dropping the logger flushes pending records.
pub struct EventLogger {
    /// Channel sender for async communication with logger thread
    sender: Sender<LoggerCommand>,
    /// Flag indicating if a flush operation is in progress
    flushing: Arc<AtomicBool>,
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("failed to flush lock inspector log during drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If it contains "{timestamp}", that
    ///   placeholder is replaced with the current UTC time.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the file
    /// cannot be opened or the writer thread cannot be spawned
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = resolve_path(path.as_ref());

        if let Some(parent) = path_buf.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path_buf)
            .with_context(|| format!("Failed to open log file {}", path_buf.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        let flushing = Arc::new(AtomicBool::new(false));

        thread::Builder::new()
            .name("lockinspect-log".into())
            .spawn(move || async_logger_thread(file, rx))
            .context("Failed to spawn log writer thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing,
            path: path_buf,
        })
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a record for writing; never blocks on I/O
    pub fn log(&self, record: LogRecord) {
        if let Err(e) = self.sender.send(LoggerCommand::Record(record)) {
            log::warn!("failed to send log record: {e:?}");
        }
    }

    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        self.log(LogRecord::Anomaly(anomaly.clone()));
    }

    pub fn log_report(&self, report: &CollisionReport) {
        self.log(LogRecord::CollisionReport(report.clone()));
    }

    /// Force flush all pending records to disk
    ///
    /// Blocks until the writer thread has written everything queued before
    /// this call.
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not answer
    /// within ten seconds
    pub fn flush(&self) -> Result<()> {
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();

        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .context("Log writer thread is gone")?;

            flush_rx
                .recv_timeout(Duration::from_secs(10))
                .map_err(|_| anyhow::anyhow!("Flush operation timed out"))
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

/// Replace a "{timestamp}" placeholder in the file name
#[allow(clippy::literal_string_with_formatting_args)]
fn resolve_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.contains("{timestamp}") {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(raw.replace("{timestamp}", &timestamp))
    } else {
        path.to_path_buf()
    }
}

/// Writer loop: runs until every sender is dropped
fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Record(record) => {
                let written = serde_json::to_string(&record)
                    .map_err(std::io::Error::from)
                    .and_then(|json| writeln!(writer, "{json}"));
                if let Err(e) = written {
                    log::warn!("lock inspector log write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    log::warn!("lock inspector log flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        log::warn!("lock inspector log final flush error: {e:?}");
    }
}
