use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the application.
pub type ThreadId = usize;

// Global counter for assigning unique thread IDs
static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

// Thread-local storage for each thread's assigned ID
thread_local! {
    static THREAD_ID: ThreadId = {
        // Each thread gets a unique ID once, when this is first accessed
        THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    };
}

/// Get a unique identifier of the current thread
/// This will always return the same ID for the lifetime of the thread
pub fn get_current_thread_id() -> ThreadId {
    THREAD_ID.with(|&id| id)
}

/// Lock identifier type
///
/// Opaque token identifying one lock instance, typically its address. Only
/// equality is meaningful; a destroyed lock's identity may be reused.
pub type LockId = usize;

/// Opaque identifier of one captured stack frame (usually a return address)
pub type Frame = usize;

/// Ordered sequence of frames captured when a lock was acquired
///
/// Two stacks are equal iff they hold the same frames in the same order, so
/// independently captured stacks of the same call site compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallStack(Vec<Frame>);

impl CallStack {
    /// An empty stack, used when the caller did not capture one
    pub fn empty() -> Self {
        CallStack(Vec::new())
    }

    pub fn from_frames<I: IntoIterator<Item = Frame>>(frames: I) -> Self {
        CallStack(frames.into_iter().collect())
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Frame>> for CallStack {
    fn from(frames: Vec<Frame>) -> Self {
        CallStack(frames)
    }
}

/// One acquisition of a lock from one call site
///
/// This is the value stored in every tree node. Equality is structural: the
/// same lock taken from two different call sites yields two distinct
/// observations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockObservation {
    pub lock_id: LockId,
    #[serde(default, skip_serializing_if = "CallStack::is_empty")]
    pub stack: CallStack,
}

impl LockObservation {
    pub fn new(lock_id: LockId, stack: CallStack) -> Self {
        LockObservation { lock_id, stack }
    }

    /// Observation without a captured call stack
    pub fn bare(lock_id: LockId) -> Self {
        LockObservation {
            lock_id,
            stack: CallStack::empty(),
        }
    }
}

/// Kind of transition reported by the instrumentation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// The thread acquired the lock
    Lock,
    /// The thread released the lock
    Unlock,
    /// The lock object is being destroyed
    Destroy,
}

/// A single observed lock transition
///
/// Created on the instrumented thread and consumed exactly once by the event
/// stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub lock_id: LockId,
    pub kind: EventKind,
    pub thread_id: ThreadId,
    pub stack: Option<CallStack>,
}

impl LockEvent {
    pub fn lock(thread_id: ThreadId, lock_id: LockId, stack: Option<CallStack>) -> Self {
        LockEvent {
            lock_id,
            kind: EventKind::Lock,
            thread_id,
            stack,
        }
    }

    pub fn unlock(thread_id: ThreadId, lock_id: LockId) -> Self {
        LockEvent {
            lock_id,
            kind: EventKind::Unlock,
            thread_id,
            stack: None,
        }
    }

    pub fn destroy(thread_id: ThreadId, lock_id: LockId) -> Self {
        LockEvent {
            lock_id,
            kind: EventKind::Destroy,
            thread_id,
            stack: None,
        }
    }

    /// Turn the event into the observation stored in the tree
    pub fn into_observation(self) -> LockObservation {
        LockObservation::new(self.lock_id, self.stack.unwrap_or_default())
    }
}

/// Kind of anomaly found while replaying a thread's lock events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// An unlock did not match the innermost held lock
    LockOrderViolation {
        /// Lock the thread was expected to release
        expected: LockId,
    },
    /// An unlock arrived while the thread held no monitored lock
    UnbalancedUnlock,
    /// Nesting depth went past the configured bound
    DepthOverflow { limit: usize },
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::LockOrderViolation { expected } => write!(
                f,
                "unlock order does not match lock order (expected lock {expected:#x})"
            ),
            AnomalyKind::UnbalancedUnlock => write!(f, "unlock without a matching lock"),
            AnomalyKind::DepthOverflow { limit } => {
                write!(f, "lock nesting deeper than {limit}")
            }
        }
    }
}

/// A confirmed anomaly in one thread's lock usage
///
/// Violations and unbalanced unlocks cause the thread's in-flight tree to be
/// discarded; depth overflow is purely informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub thread_id: ThreadId,
    /// Lock named by the event that triggered the anomaly
    pub lock_id: LockId,
    /// Nesting depth of the thread when the anomaly was seen
    pub depth: usize,
    /// RFC 3339 timestamp of detection
    pub timestamp: String,
}

/// One root-to-leaf path of the lock tree with its call stacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branch(pub Vec<LockObservation>);

impl Branch {
    /// Lock identities along the branch, root first
    pub fn locks(&self) -> Vec<LockId> {
        self.0.iter().map(|o| o.lock_id).collect()
    }

    pub fn observations(&self) -> &[LockObservation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Two acquisition orders over the same locks that disagree on their order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionPair {
    pub first: Branch,
    pub second: Branch,
    /// Shared locks in the order `first` acquires them
    pub first_order: Vec<LockId>,
    /// Shared locks in the order `second` acquires them
    pub second_order: Vec<LockId>,
}

/// A branch together with every branch it collides with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionEntry {
    pub branch: Branch,
    pub collides_with: Vec<Branch>,
}

impl CollisionEntry {
    /// Number of branches this one collides with
    pub fn degree(&self) -> usize {
        self.collides_with.len()
    }
}

/// Result of one collision analysis pass
///
/// `pairs` lists each colliding unordered pair once; `entries` ranks the
/// branches taking part in at least one collision by collision degree,
/// highest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionReport {
    /// Number of branches in the analyzed snapshot
    pub branch_count: usize,
    pub pairs: Vec<CollisionPair>,
    pub entries: Vec<CollisionEntry>,
    /// RFC 3339 timestamp of the analysis
    pub timestamp: String,
}

impl CollisionReport {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_thread_id_consistency() {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let id1 = get_current_thread_id();
            let id2 = get_current_thread_id();

            // All calls should return the same ID
            assert_eq!(id1, id2);

            tx.send(id1).unwrap();
        });

        let thread_id = rx.recv().unwrap();
        handle.join().unwrap();
        assert_ne!(thread_id, get_current_thread_id());
    }

    #[test]
    fn test_thread_id_uniqueness() {
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for _ in 0..10 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                tx.send(get_current_thread_id()).unwrap();
            }));
        }

        let mut ids = vec![];
        for _ in 0..10 {
            ids.push(rx.recv().unwrap());
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Verify all IDs are unique
        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
    }

    #[test]
    fn test_observation_equality_is_structural() {
        let a = LockObservation::new(0x10, CallStack::from_frames([1, 2, 3]));
        let b = LockObservation::new(0x10, CallStack::from(vec![1, 2, 3]));
        let other_site = LockObservation::new(0x10, CallStack::from_frames([1, 2, 4]));

        assert_eq!(a, b);
        assert_ne!(a, other_site);
        assert_ne!(a, LockObservation::bare(0x10));
    }

    #[test]
    fn test_anomaly_serializes_with_kind_tag() {
        let anomaly = Anomaly {
            kind: AnomalyKind::LockOrderViolation { expected: 7 },
            thread_id: 3,
            lock_id: 9,
            depth: 2,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };

        let json = serde_json::to_string(&anomaly).unwrap();
        assert!(json.contains("\"type\":\"lock_order_violation\""));
        assert!(json.contains("\"expected\":7"));

        let back: Anomaly = serde_json::from_str(&json).unwrap();
        assert_eq!(back, anomaly);
    }
}
