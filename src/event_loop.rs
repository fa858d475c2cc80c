//! Socket and Timer Event Loop
//!
//! Layers periodic timers on top of the [`Poller`] and dispatches both
//! kinds of event to user callbacks from a single thread. A callback
//! returning `false` stops the loop; it also stops when both registries
//! are empty, when the interrupt latch fires while the loop is
//! interruptible, and when the underlying context is torn down.
//!
//! ## Ordering
//!
//! Within one iteration every due timer fires before any socket callback,
//! timers in registration order, then ready sockets in poller
//! registration order. A persistently ready socket can starve
//! later-registered ones unless its handler consumes the message and
//! yields by returning `true`.
//!
//! ## Re-entrancy
//!
//! Handlers may call any loop operation, including removing themselves.
//! Timer removal only flags the entry; flagged timers are pruned at the
//! start of the next iteration and after the timer dispatch pass, so the
//! dispatch scan never invalidates itself. Sockets and timers added from
//! inside a handler take effect from the next iteration onward.

use crate::error::{Error, Result};
use crate::poller::Poller;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Identifier of a scheduled timer, unique for the lifetime of its loop
pub type TimerId = usize;

type SocketHandler<'s> = Box<dyn FnMut(&mut EventLoop<'s>, &'s zmq::Socket) -> bool + 's>;
type TimerHandler<'s> = Box<dyn FnMut(&mut EventLoop<'s>, TimerId) -> bool + 's>;

struct SocketEntry<'s> {
    socket: &'s zmq::Socket,
    // Taken out of the slot for the duration of its own call, so the
    // handler can borrow the loop mutably.
    handler: Option<SocketHandler<'s>>,
}

struct Timer<'s> {
    id: TimerId,
    period: Duration,
    /// Remaining fire count; zero means unbounded
    occurrences_left: usize,
    next_fire: Instant,
    handler: Option<TimerHandler<'s>>,
    removed: bool,
}

/// Single-threaded dispatcher over socket readiness and timers
pub struct EventLoop<'s> {
    poller: Poller<'s>,
    sockets: Vec<SocketEntry<'s>>,
    timers: Vec<Timer<'s>>,
    next_timer_id: TimerId,
    timer_ids_wrapped: bool,
    check_interval: Option<Duration>,
}

impl<'s> EventLoop<'s> {
    /// Create an empty loop
    pub fn new() -> Self {
        Self {
            poller: Poller::new(),
            sockets: Vec::new(),
            timers: Vec::new(),
            next_timer_id: 0,
            timer_ids_wrapped: false,
            check_interval: None,
        }
    }

    /// Register a socket and the handler invoked when it is ready to
    /// receive. The handler returns `false` to request loop exit.
    pub fn add<F>(&mut self, socket: &'s zmq::Socket, handler: F) -> Result<()>
    where
        F: FnMut(&mut EventLoop<'s>, &'s zmq::Socket) -> bool + 's,
    {
        self.poller.add(socket)?;
        self.sockets.push(SocketEntry {
            socket,
            handler: Some(Box::new(handler)),
        });
        Ok(())
    }

    /// Unregister a socket and forget its handler; no-op if absent
    pub fn remove(&mut self, socket: &zmq::Socket) {
        self.poller.remove(socket);
        self.sockets.retain(|entry| !ptr::eq(entry.socket, socket));
    }

    /// Schedule a timer firing every `period`, `occurrences` times (zero
    /// means until removed). The first fire is one period from now.
    pub fn add_timer<F>(
        &mut self,
        period: Duration,
        occurrences: usize,
        handler: F,
    ) -> Result<TimerId>
    where
        F: FnMut(&mut EventLoop<'s>, TimerId) -> bool + 's,
    {
        let id = self.allocate_timer_id()?;
        self.timers.push(Timer {
            id,
            period,
            occurrences_left: occurrences,
            next_fire: Instant::now() + period,
            handler: Some(Box::new(handler)),
            removed: false,
        });
        Ok(id)
    }

    /// Flag a timer for removal. The entry is deleted at the next prune
    /// point, so a handler may remove any timer, itself included.
    pub fn remove_timer(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.iter_mut().find(|t| t.id == id) {
            timer.removed = true;
        }
    }

    /// Whether the last `run` returned because of an interrupt or
    /// context teardown
    pub fn terminated(&self) -> bool {
        self.poller.terminated()
    }

    /// Drive the loop until a handler returns `false`, both registries
    /// empty out, or the poller terminates.
    ///
    /// `check_interval` caps every poll so a set interrupt latch is
    /// noticed within that bound even on platforms where signals do not
    /// wake the poll syscall; `None` leaves the sleep uncapped.
    pub fn run(&mut self, interruptible: bool, check_interval: Option<Duration>) -> Result<()> {
        self.poller.set_interruptible(interruptible);
        self.check_interval = check_interval;

        loop {
            self.prune_timers();
            if self.sockets.is_empty() && self.timers.is_empty() {
                debug!("event loop exit: both registries empty");
                return Ok(());
            }

            let timeout = self.next_wakeup(Instant::now());
            let ready = self.poller.wait_all(timeout)?;
            if self.poller.terminated() {
                debug!("event loop exit: terminated");
                return Ok(());
            }

            let mut keep_running = self.fire_due_timers();
            self.prune_timers();
            if keep_running {
                keep_running = self.dispatch_ready(ready);
            }
            if !keep_running {
                debug!("event loop exit: handler requested stop");
                return Ok(());
            }
        }
    }

    /// Duration until the earliest pending timer, capped by the
    /// interrupt check interval; `None` means wait forever.
    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        let until_timer = self
            .timers
            .iter()
            .filter(|t| !t.removed)
            .map(|t| t.next_fire)
            .min()
            .map(|at| at.saturating_duration_since(now));
        match (until_timer, self.check_interval) {
            (Some(wait), Some(cap)) => Some(wait.min(cap)),
            (Some(wait), None) => Some(wait),
            (None, cap) => cap,
        }
    }

    /// Fire every non-removed timer that is due; returns `false` when a
    /// handler asked the loop to stop.
    fn fire_due_timers(&mut self) -> bool {
        let now = Instant::now();
        // Timers appended by handlers are considered from the next
        // iteration onward.
        let count = self.timers.len();
        for index in 0..count {
            let due = {
                let timer = &self.timers[index];
                !timer.removed && timer.next_fire <= now
            };
            if !due {
                continue;
            }
            let id = self.timers[index].id;
            let Some(mut handler) = self.timers[index].handler.take() else {
                continue;
            };
            trace!(timer = id, "timer due");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut *self, id)));
            self.timers[index].handler = Some(handler);
            let keep = match outcome {
                Ok(keep) => keep,
                Err(payload) => panic::resume_unwind(payload),
            };
            if !keep {
                return false;
            }
            let timer = &mut self.timers[index];
            if timer.removed {
                continue;
            }
            if timer.occurrences_left > 0 {
                timer.occurrences_left -= 1;
                if timer.occurrences_left == 0 {
                    timer.removed = true;
                    continue;
                }
            }
            // One fire per iteration however late it ran; no catch-up.
            timer.next_fire += timer.period;
        }
        true
    }

    /// Invoke the handlers of the ready sockets in registration order;
    /// returns `false` when a handler asked the loop to stop.
    fn dispatch_ready(&mut self, ready: Vec<&'s zmq::Socket>) -> bool {
        for socket in ready {
            let Some(index) = self
                .sockets
                .iter()
                .position(|entry| ptr::eq(entry.socket, socket))
            else {
                // Removed by an earlier handler in this same iteration.
                continue;
            };
            let Some(mut handler) = self.sockets[index].handler.take() else {
                continue;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut *self, socket)));
            // The handler may have removed its own entry, or removed and
            // re-registered the socket with a fresh handler; only an
            // untouched slot gets the original back.
            if let Some(entry) = self
                .sockets
                .iter_mut()
                .find(|entry| ptr::eq(entry.socket, socket))
            {
                if entry.handler.is_none() {
                    entry.handler = Some(handler);
                }
            }
            let keep = match outcome {
                Ok(keep) => keep,
                Err(payload) => panic::resume_unwind(payload),
            };
            if !keep {
                return false;
            }
        }
        true
    }

    fn prune_timers(&mut self) {
        self.timers.retain(|timer| !timer.removed);
    }

    fn allocate_timer_id(&mut self) -> Result<TimerId> {
        if !self.timer_ids_wrapped {
            let id = self.next_timer_id;
            let (next, wrapped) = self.next_timer_id.overflowing_add(1);
            self.next_timer_id = next;
            if wrapped {
                self.timer_ids_wrapped = true;
            }
            return Ok(id);
        }
        // The counter has wrapped at least once: probe forward until a
        // candidate aliases no live timer. Probing one slot more than the
        // number of live timers guarantees a hit when any id is free.
        let mut candidate = self.next_timer_id;
        for _ in 0..=self.timers.len() {
            if !self.timers.iter().any(|t| t.id == candidate) {
                self.next_timer_id = candidate.wrapping_add(1);
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
        Err(Error::TimerIdsExhausted)
    }
}

impl Default for EventLoop<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("sockets", &self.sockets.len())
            .field("timers", &self.timers.len())
            .field("terminated", &self.terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_ids_are_monotone_before_wrap() {
        let mut el = EventLoop::new();
        let a = el.add_timer(Duration::from_millis(1), 1, |_, _| true).unwrap();
        let b = el.add_timer(Duration::from_millis(1), 1, |_, _| true).unwrap();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_timer_id_allocation_survives_wrap() {
        let mut el = EventLoop::new();
        el.next_timer_id = TimerId::MAX;
        let last = el.allocate_timer_id().unwrap();
        assert_eq!(last, TimerId::MAX);
        assert!(el.timer_ids_wrapped);

        // Occupy the first two post-wrap candidates and allocate again.
        for id in [0, 1] {
            el.timers.push(Timer {
                id,
                period: Duration::from_millis(1),
                occurrences_left: 1,
                next_fire: Instant::now(),
                handler: Some(Box::new(|_, _| true)),
                removed: false,
            });
        }
        let next = el.allocate_timer_id().unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_remove_timer_flags_instead_of_deleting() {
        let mut el = EventLoop::new();
        let id = el.add_timer(Duration::from_millis(1), 1, |_, _| true).unwrap();
        el.remove_timer(id);
        assert_eq!(el.timers.len(), 1);
        assert!(el.timers[0].removed);
        el.prune_timers();
        assert!(el.timers.is_empty());
    }

    #[test]
    fn test_run_returns_immediately_when_empty() {
        let mut el = EventLoop::new();
        el.run(false, None).unwrap();
        assert!(!el.terminated());
    }
}
