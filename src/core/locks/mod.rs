pub mod mutex;

use std::sync::atomic::AtomicUsize;

// Identities handed to instrumented mutexes; never reused
static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);
