//! Process-Wide Interrupt Latch
//!
//! Translates SIGINT and SIGTERM into a single process-global flag that
//! the poller checks cooperatively. `install` swaps in the latch handlers
//! and saves whatever was active before; `restore` puts the saved
//! handlers back. The flag itself is a relaxed atomic: `is_set` and
//! `clear` are wait-free and safe to call from any thread.
//!
//! The handlers are installed with `sa_flags = 0`, so on POSIX platforms
//! a signal interrupts blocking calls into libzmq with EINTR and wakes an
//! in-progress wait. On platforms without that behavior the signal only
//! sets the latch, and callers should poll with a bounded wait period
//! (see `EventLoop::run`'s check interval).

use std::sync::atomic::{AtomicBool, Ordering};

static LATCH: AtomicBool = AtomicBool::new(false);

/// Check whether an interrupt (SIGINT or SIGTERM) was received
pub fn is_set() -> bool {
    LATCH.load(Ordering::Relaxed)
}

/// Reset the latch so new interrupts can be observed
pub fn clear() {
    LATCH.store(false, Ordering::Relaxed);
}

#[cfg(unix)]
pub use platform::{install, restore};

#[cfg(unix)]
mod platform {
    use super::LATCH;
    use parking_lot::Mutex;
    use std::mem;
    use std::ptr;
    use std::sync::atomic::Ordering;

    struct SavedActions {
        int: libc::sigaction,
        term: libc::sigaction,
    }

    // Populated by the first `install` after a `restore` (or ever); the
    // handlers active at that moment are what `restore` reinstates.
    static SAVED: Mutex<Option<SavedActions>> = Mutex::new(None);

    extern "C" fn latch_signal(_signum: libc::c_int) {
        LATCH.store(true, Ordering::Relaxed);
    }

    /// Install the latch handlers for SIGINT and SIGTERM.
    ///
    /// The first call (or the first call after `restore`) saves the
    /// currently installed handlers; repeated calls overwrite the
    /// installation without re-saving.
    pub fn install() {
        let mut saved = SAVED.lock();
        unsafe {
            if saved.is_none() {
                let mut int: libc::sigaction = mem::zeroed();
                let mut term: libc::sigaction = mem::zeroed();
                libc::sigaction(libc::SIGINT, ptr::null(), &mut int);
                libc::sigaction(libc::SIGTERM, ptr::null(), &mut term);
                *saved = Some(SavedActions { int, term });
            }

            let mut action: libc::sigaction = mem::zeroed();
            let handler: extern "C" fn(libc::c_int) = latch_signal;
            action.sa_sigaction = handler as usize;
            // No SA_RESTART: blocking calls must come back with EINTR.
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(libc::SIGINT, &action, ptr::null_mut());
            libc::sigaction(libc::SIGTERM, &action, ptr::null_mut());
        }
    }

    /// Reinstate the handlers captured by the matching `install`.
    ///
    /// Does nothing if `install` was never called or the handlers were
    /// already restored. The next `install` saves again.
    pub fn restore() {
        let mut saved = SAVED.lock();
        if let Some(actions) = saved.take() {
            unsafe {
                libc::sigaction(libc::SIGINT, &actions.int, ptr::null_mut());
                libc::sigaction(libc::SIGTERM, &actions.term, ptr::null_mut());
            }
        }
    }
}

#[cfg(not(unix))]
pub use platform::{install, restore};

#[cfg(not(unix))]
mod platform {
    /// No handler installation on this platform; the latch can still be
    /// driven by host code and is honored by the poller.
    pub fn install() {}

    /// Matching no-op for `install`.
    pub fn restore() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    // Signal-raising coverage lives in tests/interrupt_latch.rs, where
    // the process-global handler state is exercised sequentially.
    #[test]
    fn test_latch_flag_is_clear_by_default() {
        assert!(!is_set());
        clear();
        assert!(!is_set());
    }
}
