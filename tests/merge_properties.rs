mod common;
use common::{NO_REPORT_TIMEOUT, assert_no_report, start_inspector, wait_for_tree};
use lockinspect::{LockEvent, LockId, ThreadId, analyze};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

fn balanced(thread_id: ThreadId, locks: &[LockId]) -> Vec<LockEvent> {
    let mut events: Vec<_> = locks
        .iter()
        .map(|&l| LockEvent::lock(thread_id, l, None))
        .collect();
    events.extend(locks.iter().rev().map(|&l| LockEvent::unlock(thread_id, l)));
    events
}

/// Randomly interleave the per-thread sequences, keeping each one in order
fn interleave(mut sequences: Vec<Vec<LockEvent>>, rng: &mut StdRng) -> Vec<LockEvent> {
    let mut slots: Vec<usize> = sequences
        .iter()
        .enumerate()
        .flat_map(|(i, s)| std::iter::repeat_n(i, s.len()))
        .collect();
    slots.shuffle(rng);

    for sequence in &mut sequences {
        sequence.reverse();
    }
    slots
        .into_iter()
        .filter_map(|i| sequences[i].pop())
        .collect()
}

#[test]
fn test_interleaving_does_not_change_branches() {
    let per_thread: Vec<(ThreadId, Vec<LockId>)> = vec![
        (1, vec![1, 2, 3]),
        (2, vec![1, 2, 6]),
        (3, vec![4, 5]),
        (4, vec![7]),
    ];
    let mut expected: Vec<Vec<LockId>> = per_thread.iter().map(|(_, l)| l.clone()).collect();
    expected.sort();
    let node_count = 7;

    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let sequences = per_thread
            .iter()
            .map(|(t, locks)| balanced(*t, locks))
            .collect();

        let h = start_inspector();
        let handle = h.inspector.handle();
        for event in interleave(sequences, &mut rng) {
            handle.submit(event);
        }

        let tree = wait_for_tree(&h, |t| t.len() == node_count);
        let mut branches = tree.branch_locks();
        branches.sort();
        assert_eq!(branches, expected, "seed {seed}");
    }
}

#[test]
fn test_repeated_merge_is_idempotent() {
    let h = start_inspector();
    let handle = h.inspector.handle();

    for event in balanced(1, &[1, 2, 3]).into_iter().chain(balanced(2, &[3, 1])) {
        handle.submit(event);
    }
    let first = wait_for_tree(&h, |t| t.len() == 5);
    let first_report = analyze(&first);
    assert_eq!(first_report.pairs.len(), 1);

    // Same sequences again, from other threads
    for event in balanced(3, &[1, 2, 3]).into_iter().chain(balanced(4, &[3, 1])) {
        handle.submit(event);
    }
    // A marker merge tells us the repeats were processed
    for event in balanced(5, &[9]) {
        handle.submit(event);
    }
    let second = wait_for_tree(&h, |t| t.contains_lock(9));

    assert_eq!(second.len(), first.len() + 1);
    assert_eq!(analyze(&second).pairs, first_report.pairs);
}

#[test]
fn test_shared_prefix_shares_nodes() {
    let h = start_inspector();
    let handle = h.inspector.handle();

    for event in balanced(1, &[1, 2]).into_iter().chain(balanced(2, &[1, 3])) {
        handle.submit(event);
    }

    let tree = wait_for_tree(&h, |t| t.len() == 3);
    assert_eq!(tree.roots().len(), 1);
    assert_eq!(tree.branch_locks(), vec![vec![1, 2], vec![1, 3]]);
    assert_no_report(&h, NO_REPORT_TIMEOUT);
}
