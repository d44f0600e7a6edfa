// ---------------------------------------------------------------------------
// Reentrancy guard
// ---------------------------------------------------------------------------
//
// Our own bookkeeping (creating the FIFO, logging, writing frames) goes
// through libc and lands back in our exports. While a hook is active on a
// thread, nested calls on that thread go straight to the genuine functions.

use libc::c_int;
use std::cell::Cell;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

pub struct ReentrancyGuard;

impl ReentrancyGuard {
    /// `None` if this thread is already inside a hook, or is being torn down
    pub fn enter() -> Option<Self> {
        IN_HOOK
            .try_with(|flag| {
                if flag.get() {
                    None
                } else {
                    flag.set(true);
                    Some(ReentrancyGuard)
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

// ---------------------------------------------------------------------------
// errno preservation
// ---------------------------------------------------------------------------

/// Restores the calling thread's `errno` when dropped
///
/// Held across bookkeeping that runs after the genuine call returned, so the
/// observed program sees the `errno` the genuine call left behind.
pub struct ErrnoGuard(c_int);

impl ErrnoGuard {
    pub fn save() -> Self {
        #[allow(unsafe_code)]
        // SAFETY: __errno_location always returns a valid thread-local pointer.
        Self(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        #[allow(unsafe_code)]
        // SAFETY: as in `save`.
        unsafe {
            *libc::__errno_location() = self.0;
        }
    }
}
