use lockinspect::ffi::*;
use std::ffi::{CStr, c_void};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Mutex as StdMutex;
use std::thread;
use std::time::{Duration, Instant};

static REPORTS: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

extern "C" fn on_report(json: *const c_char) {
    let json = unsafe { CStr::from_ptr(json) }.to_string_lossy().into_owned();
    REPORTS.lock().unwrap().push(json);
}

fn nested(outer: *const c_void, inner: *const c_void, frames: &[usize]) {
    unsafe {
        lockinspect_on_lock(outer, frames.as_ptr(), frames.len());
        lockinspect_on_lock(inner, ptr::null(), 0);
    }
    lockinspect_on_unlock(inner);
    lockinspect_on_unlock(outer);
}

// The C API drives one process-wide inspector, so everything runs in one test
#[test]
fn test_c_api_lifecycle() {
    let a = 0x1000 as *const c_void;
    let b = 0x2000 as *const c_void;

    // Ignored before init
    lockinspect_on_unlock(a);
    assert_eq!(lockinspect_is_collision_detected(), 0);

    assert_eq!(unsafe { lockinspect_init(ptr::null(), Some(on_report)) }, 0);
    assert_eq!(unsafe { lockinspect_init(ptr::null(), None) }, 1);

    // Raw pointers are not Send, so the other thread gets the addresses
    let (a_addr, b_addr) = (a as usize, b as usize);
    // Traces this thread's events at trace level
    lockinspect_watch_current_thread();

    thread::spawn(move || nested(a_addr as *const c_void, b_addr as *const c_void, &[0xdead]))
        .join()
        .unwrap();
    nested(b, a, &[]);
    lockinspect_unwatch_thread();

    let deadline = Instant::now() + Duration::from_secs(3);
    while lockinspect_is_collision_detected() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(lockinspect_is_collision_detected(), 1);

    let json = REPORTS.lock().unwrap()[0].clone();
    let report: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(report["pairs"].as_array().unwrap().len(), 1);
    assert!(json.contains(&0xdead.to_string()));

    lockinspect_reset_collision_flag();
    assert_eq!(lockinspect_is_collision_detected(), 0);

    lockinspect_on_lock_destroyed(a);
    lockinspect_shutdown();
    lockinspect_shutdown();
}
