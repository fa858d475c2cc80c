//! Interrupt Latch Tests
//!
//! Signal handlers and the latch flag are process-global, so every phase
//! runs sequentially inside one test function: latch basics, the poller's
//! interruptible/non-interruptible translation, loop shutdown through the
//! latch, and a non-interruptible loop that finishes via its timer while
//! the interrupt is only observed at process level.

#![cfg(unix)]

use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};
use zmqkit::{interrupt, EventLoop, Poller};

fn raise_sigint() {
    unsafe {
        libc::raise(libc::SIGINT);
    }
}

#[test]
fn test_interrupt_latch_poller_and_loop() {
    // --- latch basics -------------------------------------------------
    interrupt::install();
    // Repeated installs between install and restore must not re-save.
    interrupt::install();
    assert!(!interrupt::is_set());

    raise_sigint();
    assert!(interrupt::is_set());
    interrupt::clear();
    assert!(!interrupt::is_set());

    // --- poller: latch set before the wait ----------------------------
    let ctx = zmq::Context::new();
    let idle = ctx.socket(zmq::PULL).unwrap();
    idle.bind("inproc://interrupt-idle").unwrap();

    let mut poller = Poller::new();
    poller.add(&idle).unwrap();

    raise_sigint();
    let begun = Instant::now();
    let ready = poller.wait(Some(Duration::from_millis(500))).unwrap();
    assert!(ready.is_none());
    assert!(poller.terminated());
    assert!(begun.elapsed() < Duration::from_millis(100));

    // Non-interruptible: the set latch is a mere wakeup, the wait runs
    // to its timeout and does not terminate.
    poller.set_interruptible(false);
    let ready = poller.wait(Some(Duration::from_millis(10))).unwrap();
    assert!(ready.is_none());
    assert!(!poller.terminated());
    interrupt::clear();

    // --- loop shutdown through the latch ------------------------------
    let mut el = EventLoop::new();
    el.add(&idle, |_, _| true).unwrap();
    let raiser = thread::spawn(|| {
        thread::sleep(Duration::from_millis(10));
        raise_sigint();
    });
    let begun = Instant::now();
    el.run(true, Some(Duration::from_millis(5))).unwrap();
    assert!(el.terminated());
    assert!(begun.elapsed() < Duration::from_millis(100));
    raiser.join().unwrap();
    interrupt::clear();

    // --- non-interruptible loop finishes via its timer -----------------
    let timer_ran = Cell::new(false);
    let mut el = EventLoop::new();
    el.add(&idle, |_, _| true).unwrap();
    el.add_timer(Duration::from_millis(20), 1, |_, _| {
        timer_ran.set(true);
        false
    })
    .unwrap();
    let raiser = thread::spawn(|| {
        thread::sleep(Duration::from_millis(10));
        raise_sigint();
    });
    el.run(false, Some(Duration::from_millis(5))).unwrap();
    assert!(timer_ran.get());
    assert!(!el.terminated());
    // The interrupt happened and is visible at process level only.
    assert!(interrupt::is_set());
    raiser.join().unwrap();

    interrupt::restore();
    interrupt::clear();
}
