use super::thread_tree::ThreadLockTree;
use crate::core::tree::LockTree;
use crate::core::types::{Anomaly, AnomalyKind, EventKind, LockEvent, LockId, ThreadId};
use chrono::Utc;
use fxhash::FxHashMap;

/// Work item handed from the event stage to the tree stage
#[derive(Debug, Clone)]
pub enum TreeAction {
    /// Merge a completed per-thread tree into the global tree
    Merge(LockTree),
    /// Purge every node referencing a destroyed lock
    Delete(LockId),
}

/// Replays lock events per thread and turns completed nesting sequences into
/// tree actions
///
/// Owned by the event thread alone, so the per-thread map needs no locking.
pub(crate) struct EventStage {
    threads: FxHashMap<ThreadId, ThreadLockTree>,
    max_depth: usize,
}

impl EventStage {
    pub fn new(max_depth: usize) -> Self {
        EventStage {
            threads: FxHashMap::default(),
            max_depth,
        }
    }

    /// Number of threads currently holding at least one monitored lock
    #[cfg(test)]
    pub fn active_threads(&self) -> usize {
        self.threads.len()
    }

    /// Process one event
    ///
    /// # Arguments
    /// * `event` - The event to replay
    /// * `anomalies` - Receives any anomaly the event reveals
    ///
    /// # Returns
    /// The action to forward to the tree stage, if any
    pub fn process(
        &mut self,
        event: LockEvent,
        anomalies: &mut Vec<Anomaly>,
    ) -> Option<TreeAction> {
        match event.kind {
            // A destroyed lock's identity may be reused right away, so every
            // reference goes before anything else can observe it
            EventKind::Destroy => Some(TreeAction::Delete(event.lock_id)),
            EventKind::Lock => {
                let thread_id = event.thread_id;
                let lock_id = event.lock_id;
                let state = self.threads.entry(thread_id).or_default();
                let depth = state.lock(event.into_observation());

                // Reported once, when the bound is first crossed
                if self.max_depth.checked_add(1) == Some(depth) {
                    anomalies.push(anomaly(
                        AnomalyKind::DepthOverflow {
                            limit: self.max_depth,
                        },
                        thread_id,
                        lock_id,
                        depth,
                    ));
                }
                None
            }
            EventKind::Unlock => {
                let thread_id = event.thread_id;
                let state = self.threads.entry(thread_id).or_default();
                let depth_before = state.depth();

                if let Err(kind) = state.unlock(event.lock_id) {
                    anomalies.push(anomaly(kind, thread_id, event.lock_id, depth_before));
                }

                if state.depth() > 0 {
                    return None;
                }

                self.threads
                    .remove(&thread_id)
                    .and_then(ThreadLockTree::into_mergeable)
                    .map(TreeAction::Merge)
            }
        }
    }
}

fn anomaly(kind: AnomalyKind, thread_id: ThreadId, lock_id: LockId, depth: usize) -> Anomaly {
    Anomaly {
        kind,
        thread_id,
        lock_id,
        depth,
        timestamp: Utc::now().to_rfc3339(),
    }
}
