use lockinspect::{Anomaly, CollisionReport, Inspector, LockInspector, LockTree};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

#[allow(dead_code)]
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_REPORT_TIMEOUT: Duration = Duration::from_millis(300);
pub const TEST_REPORT_INTERVAL: Duration = Duration::from_millis(20);

pub struct InspectorHarness {
    pub inspector: Inspector,
    pub rx: mpsc::Receiver<CollisionReport>,
    pub anomalies: Arc<StdMutex<Vec<Anomaly>>>,
}

#[allow(dead_code)]
pub fn start_inspector() -> InspectorHarness {
    start_with(LockInspector::new())
}

pub fn start_with(builder: LockInspector) -> InspectorHarness {
    let (tx, rx) = mpsc::channel::<CollisionReport>();
    let tx = StdMutex::new(tx);
    let anomalies = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&anomalies);

    let inspector = builder
        .report_interval(TEST_REPORT_INTERVAL)
        .callback(move |report| {
            let _ = tx.lock().unwrap().send(report);
        })
        .on_anomaly(move |anomaly| sink.lock().unwrap().push(anomaly.clone()))
        .start()
        .expect("Failed to start inspector");

    InspectorHarness {
        inspector,
        rx,
        anomalies,
    }
}

#[allow(dead_code)]
pub fn expect_report(h: &InspectorHarness, timeout: Duration) -> CollisionReport {
    match h.rx.recv_timeout(timeout) {
        Ok(report) => {
            assert!(!report.pairs.is_empty(), "Delivered report should collide");
            report
        }
        Err(_) => panic!("No collision reported within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_report(h: &InspectorHarness, timeout: Duration) {
    assert!(
        h.rx.recv_timeout(timeout).is_err(),
        "Unexpected collision reported"
    );
}

/// Poll the published tree until `done` holds or the timeout expires
#[allow(dead_code)]
pub fn wait_for_tree<F: Fn(&LockTree) -> bool>(h: &InspectorHarness, done: F) -> Arc<LockTree> {
    let deadline = Instant::now() + REPORT_TIMEOUT;
    loop {
        let snapshot = h.inspector.snapshot();
        if done(&snapshot) || Instant::now() > deadline {
            return snapshot;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Poll the collected anomalies until at least `count` arrived
#[allow(dead_code)]
pub fn wait_for_anomalies(h: &InspectorHarness, count: usize) -> Vec<Anomaly> {
    let deadline = Instant::now() + REPORT_TIMEOUT;
    loop {
        let anomalies = h.anomalies.lock().unwrap().clone();
        if anomalies.len() >= count || Instant::now() > deadline {
            return anomalies;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
