//! The three-stage lock-order inspection pipeline
//!
//! Application threads push [`LockEvent`]s through an [`InspectorHandle`].
//! Three dedicated threads process them:
//!
//! 1. the event thread replays events per thread and emits tree actions,
//! 2. the tree thread merges completed trees into the global tree and
//!    publishes snapshots,
//! 3. the report thread analyzes the newest snapshot for order collisions.
//!
//! Each boundary is an unbounded queue drained in whole batches, except the
//! last one, which is a single "latest wins" slot. Nothing here ever touches
//! the monitored locks.

mod event_stage;
mod queue;
pub mod report_stage;
mod thread_tree;
mod tree_stage;

use crate::core::logger::EventLogger;
use crate::core::tree::LockTree;
use crate::core::types::{Anomaly, CallStack, LockEvent, LockId, ThreadId, get_current_thread_id};
use anyhow::{Context, Result};
use event_stage::{EventStage, TreeAction};
use parking_lot::Mutex;
use queue::{LatestSlot, StageQueue};
use report_stage::{ReportCallback, ReportStage};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tree_stage::TreeStage;

/// Callback receiving every anomaly found by the event stage
pub type AnomalyCallback = Arc<dyn Fn(&Anomaly) + Send + Sync>;

/// Sentinel for "no watched thread"; real thread ids start at 1
const NO_WATCHED_THREAD: ThreadId = 0;

/// Settings the pipeline threads are started with
pub struct InspectorConfig {
    /// Nesting depth above which a thread is flagged
    pub max_depth: usize,
    /// Minimum time between two collision analyses
    pub report_interval: Duration,
    /// Sink for collision reports
    pub callback: ReportCallback,
    /// Optional sink for anomalies
    pub anomaly_callback: Option<AnomalyCallback>,
    /// Optional JSON-lines log
    pub logger: Option<Arc<EventLogger>>,
}

/// State shared between the handles and the pipeline threads
struct Shared {
    events: StageQueue<LockEvent>,
    actions: StageQueue<TreeAction>,
    snapshots: LatestSlot<Arc<LockTree>>,
    latest: Mutex<Arc<LockTree>>,
    exit: AtomicBool,
    watched: AtomicUsize,
}

impl Shared {
    fn push(&self, event: LockEvent) {
        // After shutdown nothing consumes the queue any more
        if self.exit.load(Ordering::Relaxed) {
            return;
        }
        self.events.push(event);
    }
}

/// Cheap, cloneable ingestion handle
///
/// Its methods only enqueue an event and return; they never fail and never
/// panic, so they are safe to call from inside lock implementations.
#[derive(Clone)]
pub struct InspectorHandle {
    shared: Arc<Shared>,
}

impl InspectorHandle {
    /// Report that the current thread acquired `lock_id`
    ///
    /// # Arguments
    /// * `lock_id` - Identity of the lock
    /// * `stack` - Call stack of the acquisition, if the caller captured one
    pub fn notify_lock_acquired(&self, lock_id: LockId, stack: Option<CallStack>) {
        self.shared
            .push(LockEvent::lock(get_current_thread_id(), lock_id, stack));
    }

    /// Report that the current thread released `lock_id`
    pub fn notify_lock_released(&self, lock_id: LockId) {
        self.shared
            .push(LockEvent::unlock(get_current_thread_id(), lock_id));
    }

    /// Report that `lock_id` is being destroyed
    ///
    /// Every tree node referencing the lock is purged, so a new lock reusing
    /// the same identity starts from a clean slate.
    pub fn notify_lock_destroyed(&self, lock_id: LockId) {
        self.shared
            .push(LockEvent::destroy(get_current_thread_id(), lock_id));
    }

    /// Push a fully formed event, e.g. one recorded on another thread
    pub fn submit(&self, event: LockEvent) {
        self.shared.push(event);
    }
}

/// A running inspector
///
/// Owns the three pipeline threads. Dropping it (or calling
/// [`Inspector::shutdown`]) stops and joins them; events still queued at that
/// point are discarded.
pub struct Inspector {
    handle: InspectorHandle,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Inspector {
    /// Start the pipeline threads
    ///
    /// # Errors
    /// Returns an error if a thread cannot be spawned; threads already
    /// started are stopped again
    pub fn start(config: InspectorConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            events: StageQueue::new(),
            actions: StageQueue::new(),
            snapshots: LatestSlot::new(),
            latest: Mutex::new(Arc::new(LockTree::new())),
            exit: AtomicBool::new(false),
            watched: AtomicUsize::new(NO_WATCHED_THREAD),
        });

        let inspector = Inspector {
            handle: InspectorHandle {
                shared: Arc::clone(&shared),
            },
            threads: Mutex::new(Vec::with_capacity(3)),
        };

        let InspectorConfig {
            max_depth,
            report_interval,
            callback,
            anomaly_callback,
            logger,
        } = config;

        let event_shared = Arc::clone(&shared);
        let event_logger = logger.clone();
        inspector.spawn("lockinspect-events", move || {
            event_thread(event_shared, max_depth, anomaly_callback, event_logger)
        })?;

        let tree_shared = Arc::clone(&shared);
        inspector.spawn("lockinspect-tree", move || tree_thread(tree_shared))?;

        let report_shared = Arc::clone(&shared);
        let stage = ReportStage::new(callback, logger);
        inspector.spawn("lockinspect-report", move || {
            report_thread(report_shared, stage, report_interval)
        })?;

        Ok(inspector)
    }

    fn spawn<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // On error `self` is dropped by the caller, which joins what started
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .with_context(|| format!("Failed to spawn {name} thread"))?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Cloneable handle that can only submit events
    pub fn handle(&self) -> InspectorHandle {
        self.handle.clone()
    }

    /// See [`InspectorHandle::notify_lock_acquired`]
    pub fn notify_lock_acquired(&self, lock_id: LockId, stack: Option<CallStack>) {
        self.handle.notify_lock_acquired(lock_id, stack);
    }

    /// See [`InspectorHandle::notify_lock_released`]
    pub fn notify_lock_released(&self, lock_id: LockId) {
        self.handle.notify_lock_released(lock_id);
    }

    /// See [`InspectorHandle::notify_lock_destroyed`]
    pub fn notify_lock_destroyed(&self, lock_id: LockId) {
        self.handle.notify_lock_destroyed(lock_id);
    }

    /// Latest state of the global lock tree
    ///
    /// Refreshed by the tree thread after every batch that changed the tree.
    pub fn snapshot(&self) -> Arc<LockTree> {
        Arc::clone(&self.handle.shared.latest.lock())
    }

    /// Trace every event of the calling thread through `log::trace!`
    pub fn watch_current_thread(&self) {
        self.handle
            .shared
            .watched
            .store(get_current_thread_id(), Ordering::Relaxed);
    }

    /// Stop tracing the watched thread
    pub fn unwatch_thread(&self) {
        self.handle
            .shared
            .watched
            .store(NO_WATCHED_THREAD, Ordering::Relaxed);
    }

    /// Stop the pipeline and join its threads
    ///
    /// Idempotent. Events submitted afterwards are ignored.
    pub fn shutdown(&self) {
        let shared = &self.handle.shared;
        shared.exit.store(true, Ordering::Release);
        shared.events.wake();
        shared.actions.wake();
        shared.snapshots.wake();

        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.join().is_err() {
                log::warn!("lock inspector thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.shared.exit.load(Ordering::Acquire)
    }
}

impl Drop for Inspector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_thread(
    shared: Arc<Shared>,
    max_depth: usize,
    anomaly_callback: Option<AnomalyCallback>,
    logger: Option<Arc<EventLogger>>,
) {
    let mut stage = EventStage::new(max_depth);
    let mut batch = Vec::new();
    let mut anomalies = Vec::new();

    while shared.events.wait_drain(&mut batch, &shared.exit) {
        let watched = shared.watched.load(Ordering::Relaxed);

        for event in batch.drain(..) {
            trace_if_watched(watched, &event);

            if let Some(action) = stage.process(event, &mut anomalies) {
                shared.actions.push(action);
            }

            for anomaly in anomalies.drain(..) {
                report_anomaly(&anomaly, anomaly_callback.as_ref(), logger.as_deref());
            }
        }
    }
}

/// Trace `event` if it comes from the watched thread
///
/// # Returns
/// `true` if the event was traced
fn trace_if_watched(watched: ThreadId, event: &LockEvent) -> bool {
    if watched == NO_WATCHED_THREAD || event.thread_id != watched {
        return false;
    }

    log::trace!(
        "watched thread {}: {:?} lock {:#x}",
        event.thread_id,
        event.kind,
        event.lock_id
    );
    true
}

fn report_anomaly(
    anomaly: &Anomaly,
    callback: Option<&AnomalyCallback>,
    logger: Option<&EventLogger>,
) {
    log::warn!(
        "thread {}: {} (lock {:#x}, depth {})",
        anomaly.thread_id,
        anomaly.kind,
        anomaly.lock_id,
        anomaly.depth
    );

    if let Some(logger) = logger {
        logger.log_anomaly(anomaly);
    }

    if let Some(callback) = callback
        && panic::catch_unwind(AssertUnwindSafe(|| callback(anomaly))).is_err()
    {
        log::warn!("anomaly callback panicked");
    }
}

fn tree_thread(shared: Arc<Shared>) {
    let mut stage = TreeStage::new();
    let mut batch = Vec::new();

    while shared.actions.wait_drain(&mut batch, &shared.exit) {
        let current = stage.apply_batch(batch.drain(..), |snapshot| {
            shared.snapshots.publish(snapshot)
        });

        if let Some(tree) = current {
            *shared.latest.lock() = tree;
        }
    }
}

fn report_thread(shared: Arc<Shared>, stage: ReportStage, interval: Duration) {
    let mut last_report: Option<Instant> = None;

    while let Some(snapshot) = shared
        .snapshots
        .wait_take(&shared.exit, last_report.map(|t| t + interval))
    {
        stage.report(&snapshot);
        last_report = Some(Instant::now());
    }
}
