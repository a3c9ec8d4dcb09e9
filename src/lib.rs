//! # lockinspect
//!
//! A runtime lock-order inspector.
//!
//! Every lock acquisition and release reported to the inspector is replayed
//! per thread. Each completed nesting sequence is merged into one global tree
//! whose root-to-leaf branches are the distinct acquisition orders seen so
//! far. Branches that take the same locks in a different order are reported:
//! such a pair is the precondition for a deadlock, even if the program never
//! actually hung.
//!
//! ## Features
//!
//! - Non-blocking ingestion, safe to call from inside lock implementations
//! - Background three-stage pipeline, the monitored locks are never touched
//! - Collision reports with the call stacks of both acquisition orders
//! - Detection of unlock-order violations and unbalanced unlocks
//! - Optional JSON-lines log and a C API
//!
//! ```rust
//! use lockinspect::{LockInspector, Mutex};
//! use std::time::Duration;
//!
//! let inspector = LockInspector::new()
//!     .report_interval(Duration::from_millis(50))
//!     .callback(|report| println!("{} inconsistent order(s)", report.pairs.len()))
//!     .start()
//!     .unwrap();
//!
//! let a = Mutex::new(0, inspector.handle());
//! let b = Mutex::new(0, inspector.handle());
//! {
//!     let _ga = a.lock();
//!     let _gb = b.lock();
//! }
//! inspector.shutdown();
//! ```

mod core;
pub use core::{
    DEFAULT_MAX_DEPTH, DEFAULT_REPORT_INTERVAL, Inspector, InspectorHandle, LockInspector, Mutex,
    MutexGuard,
    inspector::report_stage::analyze,
    logger::{EventLogger, LogRecord, LogSummary, read_log},
    tree::{BranchIter, BranchView, LockTree, NodeId, TreeNode},
    types::{
        Anomaly, AnomalyKind, Branch, CallStack, CollisionEntry, CollisionPair, CollisionReport,
        EventKind, Frame, LockEvent, LockId, LockObservation, ThreadId, get_current_thread_id,
    },
};

pub mod ffi;
