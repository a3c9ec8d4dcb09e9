//! Pairwise lock-order collision analysis
//!
//! Every root-to-leaf branch of a snapshot is one observed acquisition
//! order. Two branches collide when, restricted to the locks they share,
//! they acquire those locks in a different order.
//!
//! The comparison assumes a lock appears at most once per branch. A branch
//! that re-acquires the same lock can make the two restricted sequences
//! differ in length; such pairs are skipped and logged rather than guessed
//! at.

use crate::core::logger::EventLogger;
use crate::core::tree::LockTree;
use crate::core::types::{CollisionEntry, CollisionPair, CollisionReport, LockId};
use chrono::Utc;
use fxhash::FxHashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Callback receiving every non-empty collision report
pub type ReportCallback = Arc<dyn Fn(CollisionReport) + Send + Sync>;

/// Keep the locks of `branch` that also occur in `other`, in branch order
fn shared_order(branch: &[LockId], other: &FxHashSet<LockId>) -> Vec<LockId> {
    branch
        .iter()
        .copied()
        .filter(|lock| other.contains(lock))
        .collect()
}

/// Analyze a snapshot for inconsistent acquisition orders
///
/// # Returns
/// A report listing each colliding pair once, plus every branch that takes
/// part in a collision ranked by collision degree (highest first, ties in
/// branch order). An empty tree yields an empty report.
pub fn analyze(tree: &LockTree) -> CollisionReport {
    let views: Vec<_> = tree.branches().collect();
    let locks: Vec<Vec<LockId>> = views.iter().map(|v| v.locks()).collect();
    let sets: Vec<FxHashSet<LockId>> = locks
        .iter()
        .map(|l| l.iter().copied().collect())
        .collect();

    let count = views.len();
    let mut collides_with: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut pairs = Vec::new();

    for i in 0..count {
        for j in (i + 1)..count {
            let first_order = shared_order(&locks[i], &sets[j]);
            let second_order = shared_order(&locks[j], &sets[i]);

            if first_order.len() != second_order.len() {
                log::debug!(
                    "skipping branch pair {i}/{j}: a lock repeats within a branch \
                     ({first_order:?} vs {second_order:?})"
                );
                continue;
            }

            if first_order != second_order {
                collides_with[i].push(j);
                collides_with[j].push(i);
                pairs.push(CollisionPair {
                    first: views[i].to_branch(),
                    second: views[j].to_branch(),
                    first_order,
                    second_order,
                });
            }
        }
    }

    let mut ranked: Vec<usize> = (0..count)
        .filter(|&i| !collides_with[i].is_empty())
        .collect();
    // Stable, so equal degrees keep branch order
    ranked.sort_by(|&a, &b| collides_with[b].len().cmp(&collides_with[a].len()));

    let entries = ranked
        .into_iter()
        .map(|i| CollisionEntry {
            branch: views[i].to_branch(),
            collides_with: collides_with[i]
                .iter()
                .map(|&j| views[j].to_branch())
                .collect(),
        })
        .collect();

    CollisionReport {
        branch_count: count,
        pairs,
        entries,
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Delivers analysis results to the report callback and the event log
pub(crate) struct ReportStage {
    callback: ReportCallback,
    logger: Option<Arc<EventLogger>>,
}

impl ReportStage {
    pub fn new(callback: ReportCallback, logger: Option<Arc<EventLogger>>) -> Self {
        ReportStage { callback, logger }
    }

    /// Analyze one snapshot and publish the result if anything collides
    ///
    /// # Returns
    /// `true` if a report was delivered
    pub fn report(&self, snapshot: &LockTree) -> bool {
        let report = analyze(snapshot);
        if report.is_empty() {
            return false;
        }

        if let Some(logger) = &self.logger {
            logger.log_report(&report);
        }

        // A panicking callback must not take the report thread down
        let callback = &self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(report))).is_err() {
            log::warn!("collision report callback panicked");
        }
        true
    }
}
