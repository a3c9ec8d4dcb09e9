//! FFI bindings for the lock inspector C API
//!
//! A native critical-section wrapper calls [`lockinspect_on_lock`],
//! [`lockinspect_on_unlock`] and [`lockinspect_on_lock_destroyed`] from its
//! lock paths, passing the lock's address as its identity. One process-wide
//! inspector backs these calls; it is created by [`lockinspect_init`] and
//! stopped by [`lockinspect_shutdown`]. Entry points called before
//! initialization are ignored.

use crate::core::{CallStack, Inspector, LockInspector};
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::slice;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static INSPECTOR: OnceLock<Inspector> = OnceLock::new();
static COLLISION_DETECTED: AtomicBool = AtomicBool::new(false);

/// Initialize the process-wide inspector.
///
/// # Arguments
/// * `log_path` - Path to a JSON-lines log file as a null-terminated C string,
///   or NULL to disable logging.
/// * `callback` - Function called with each collision report serialized as JSON,
///   or NULL for no callback.
///
/// # Returns
/// * `0` on success
/// * `1` if the inspector is already initialized (or was shut down)
/// * `-1` if the log path contains invalid UTF-8
/// * `-2` if the inspector failed to start
///
/// # Safety
/// The caller must ensure `log_path` is either `NULL` or a valid null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockinspect_init(
    log_path: *const c_char,
    callback: Option<extern "C" fn(*const c_char)>,
) -> c_int {
    if INSPECTOR.get().is_some() {
        return 1;
    }

    let log_path = if log_path.is_null() {
        None
    } else {
        match unsafe { CStr::from_ptr(log_path) }.to_str() {
            Ok(s) => Some(s.to_owned()),
            Err(_) => return -1,
        }
    };

    let mut builder = LockInspector::new().callback(move |report| {
        COLLISION_DETECTED.store(true, Ordering::SeqCst);

        if let Some(cb) = callback
            && let Ok(json) = serde_json::to_string(&report)
            && let Ok(c_str) = CString::new(json)
        {
            cb(c_str.as_ptr());
        }
    });
    if let Some(path) = log_path {
        builder = builder.with_log(path);
    }

    let inspector = match builder.start() {
        Ok(inspector) => inspector,
        Err(e) => {
            log::warn!("failed to start lock inspector: {e:#}");
            return -2;
        }
    };

    match INSPECTOR.set(inspector) {
        Ok(()) => 0,
        // Lost a race with a concurrent init; ours is dropped and shut down
        Err(_) => 1,
    }
}

/// Report that the calling thread acquired `lock`.
///
/// # Arguments
/// * `lock` - Identity of the lock, usually its address
/// * `frames` - Captured call stack (return addresses), or NULL
/// * `frame_count` - Number of entries in `frames`
///
/// # Safety
/// If `frames` is not NULL it must point to `frame_count` readable values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lockinspect_on_lock(
    lock: *const c_void,
    frames: *const usize,
    frame_count: usize,
) {
    let Some(inspector) = INSPECTOR.get() else {
        return;
    };

    let stack = if frames.is_null() || frame_count == 0 {
        None
    } else {
        let frames = unsafe { slice::from_raw_parts(frames, frame_count) };
        Some(CallStack::from_frames(frames.iter().copied()))
    };

    inspector.notify_lock_acquired(lock as usize, stack);
}

/// Report that the calling thread released `lock`.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_on_unlock(lock: *const c_void) {
    if let Some(inspector) = INSPECTOR.get() {
        inspector.notify_lock_released(lock as usize);
    }
}

/// Report that `lock` is being destroyed; its address may be reused afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_on_lock_destroyed(lock: *const c_void) {
    if let Some(inspector) = INSPECTOR.get() {
        inspector.notify_lock_destroyed(lock as usize);
    }
}

/// Trace every event of the calling thread through the log facade.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_watch_current_thread() {
    if let Some(inspector) = INSPECTOR.get() {
        inspector.watch_current_thread();
    }
}

/// Stop tracing the watched thread.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_unwatch_thread() {
    if let Some(inspector) = INSPECTOR.get() {
        inspector.unwatch_thread();
    }
}

/// Check if a collision report has been delivered.
///
/// # Returns
/// * `1` if at least one collision was reported since init or the last reset
/// * `0` otherwise
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_is_collision_detected() -> c_int {
    if COLLISION_DETECTED.load(Ordering::SeqCst) {
        1
    } else {
        0
    }
}

/// Reset the collision detected flag.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_reset_collision_flag() {
    COLLISION_DETECTED.store(false, Ordering::SeqCst);
}

/// Stop the inspector and join its threads.
///
/// Call once at process exit; later entry point calls are ignored and the
/// inspector cannot be initialized again.
#[unsafe(no_mangle)]
pub extern "C" fn lockinspect_shutdown() {
    if let Some(inspector) = INSPECTOR.get() {
        inspector.shutdown();
    }
}
