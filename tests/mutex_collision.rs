mod common;
use common::{
    NO_REPORT_TIMEOUT, REPORT_TIMEOUT, assert_no_report, expect_report, start_inspector,
    wait_for_tree,
};
use lockinspect::{CallStack, Mutex};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_two_threads_opposite_order() {
    let h = start_inspector();
    let a = Arc::new(Mutex::new(0, h.inspector.handle()));
    let b = Arc::new(Mutex::new(0, h.inspector.handle()));

    // Run one after the other so the program itself never deadlocks
    let (a1, b1) = (Arc::clone(&a), Arc::clone(&b));
    thread::spawn(move || {
        let mut ga = a1.lock();
        let mut gb = b1.lock();
        *ga += 1;
        *gb += 1;
    })
    .join()
    .unwrap();

    let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
    thread::spawn(move || {
        let _gb = b2.lock();
        let _ga = a2.lock();
    })
    .join()
    .unwrap();

    let report = expect_report(&h, REPORT_TIMEOUT);
    assert_eq!(report.pairs.len(), 1);
    let pair = &report.pairs[0];
    let mut shared = pair.first_order.clone();
    shared.sort();
    let mut expected = vec![a.id(), b.id()];
    expected.sort();
    assert_eq!(shared, expected);
}

#[test]
fn test_concurrent_consistent_order() {
    let h = start_inspector();
    let locks: Arc<Vec<Mutex<usize>>> =
        Arc::new((0..3).map(|_| Mutex::new(0, h.inspector.handle())).collect());
    let barrier = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let mut g0 = locks[0].lock();
                    let mut g1 = locks[1].lock();
                    let mut g2 = locks[2].lock();
                    *g0 += 1;
                    *g1 += 1;
                    *g2 += 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let ids: Vec<_> = locks.iter().map(|l| l.id()).collect();
    let tree = wait_for_tree(&h, |t| t.len() == 3);
    assert_eq!(tree.branch_locks(), vec![ids]);
    assert_eq!(*locks[2].lock(), 200);
    assert_no_report(&h, NO_REPORT_TIMEOUT);
}

#[test]
fn test_call_sites_split_branches() {
    let h = start_inspector();
    let a = Mutex::new((), h.inspector.handle());
    let b = Mutex::new((), h.inspector.handle());

    for site in [0x1000, 0x2000] {
        let _ga = a.lock_with_stack(CallStack::from_frames([site]));
        let _gb = b.lock();
    }

    let tree = wait_for_tree(&h, |t| t.len() == 4);
    assert_eq!(tree.roots().len(), 2);
    assert_eq!(
        tree.branch_locks(),
        vec![vec![a.id(), b.id()], vec![a.id(), b.id()]]
    );
    // Same lock order from both call sites
    assert_no_report(&h, NO_REPORT_TIMEOUT);
}

#[test]
fn test_dropped_mutex_leaves_tree() {
    let h = start_inspector();
    let a = Mutex::new((), h.inspector.handle());
    let id = {
        let b = Mutex::new((), h.inspector.handle());
        let _ga = a.lock();
        let _gb = b.lock();
        b.id()
    };
    // Both guards are released before `b` is dropped
    let tree = wait_for_tree(&h, |t| !t.contains_lock(id) && t.contains_lock(a.id()));
    assert!(!tree.contains_lock(id));
}
