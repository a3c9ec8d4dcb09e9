use crate::core::inspector::InspectorHandle;
use crate::core::locks::NEXT_LOCK_ID;
use crate::core::types::{CallStack, LockId};
use parking_lot::{Mutex as ParkingLotMutex, MutexGuard as ParkingLotMutexGuard};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::Ordering;

/// A mutex that reports its acquisitions to a lock inspector
///
/// Behaves like `parking_lot::Mutex`; additionally every acquisition,
/// release and the final drop are reported through an [`InspectorHandle`].
///
/// # Example
///
/// ```rust
/// use lockinspect::{LockInspector, Mutex};
///
/// let inspector = LockInspector::new().start().unwrap();
/// let mutex = Mutex::new(42, inspector.handle());
/// {
///     let mut guard = mutex.lock();
///     *guard += 1;
/// } // release reported here
/// assert_eq!(*mutex.lock(), 43);
/// ```
pub struct Mutex<T> {
    /// Unique identifier for this mutex
    id: LockId,
    /// The wrapped mutex
    inner: ParkingLotMutex<T>,
    inspector: InspectorHandle,
}

/// Guard for a [`Mutex`], reports the release when dropped
pub struct MutexGuard<'a, T> {
    lock_id: LockId,
    inspector: &'a InspectorHandle,
    guard: ParkingLotMutexGuard<'a, T>,
}

impl<T> Mutex<T> {
    /// Create a new Mutex with an automatically assigned ID
    ///
    /// # Arguments
    /// * `value` - The initial value to store in the mutex
    /// * `inspector` - Where lock events are reported
    pub fn new(value: T, inspector: InspectorHandle) -> Self {
        Mutex {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            inner: ParkingLotMutex::new(value),
            inspector,
        }
    }

    /// Get the ID of this mutex
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Acquire the lock, blocking until it is available
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock_inner(None)
    }

    /// Acquire the lock and record the caller-provided call stack with it
    ///
    /// Acquisitions from different call sites become distinct nodes in the
    /// lock tree.
    pub fn lock_with_stack(&self, stack: CallStack) -> MutexGuard<'_, T> {
        self.lock_inner(Some(stack))
    }

    fn lock_inner(&self, stack: Option<CallStack>) -> MutexGuard<'_, T> {
        let guard = self.inner.lock();
        self.inspector.notify_lock_acquired(self.id, stack);
        self.guard(guard)
    }

    /// Try to acquire the lock without blocking
    ///
    /// Only a successful acquisition is reported.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        self.inspector.notify_lock_acquired(self.id, None);
        Some(self.guard(guard))
    }

    fn guard<'a>(&'a self, guard: ParkingLotMutexGuard<'a, T>) -> MutexGuard<'a, T> {
        MutexGuard {
            lock_id: self.id,
            inspector: &self.inspector,
            guard,
        }
    }

    /// Consumes this mutex, returning the underlying data
    ///
    /// The lock is reported as destroyed.
    pub fn into_inner(self) -> T {
        self.inspector.notify_lock_destroyed(self.id);

        // Skip our Drop, which would report the destruction a second time
        let mutex = ManuallyDrop::new(self);

        // Safety: both fields are read exactly once and `mutex` is never
        // dropped, so nothing is dropped twice
        let (inner, inspector) = unsafe { (ptr::read(&mutex.inner), ptr::read(&mutex.inspector)) };
        drop(inspector);
        inner.into_inner()
    }

    /// Returns a mutable reference to the underlying data
    ///
    /// The mutable borrow statically guarantees no guard exists, so nothing
    /// is locked or reported.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        self.inspector.notify_lock_destroyed(self.id);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

impl<T> MutexGuard<'_, T> {
    /// Get the ID of the mutex this guard protects
    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Reported while still held, so the thread's events stay in order
        self.inspector.notify_lock_released(self.lock_id);
    }
}
