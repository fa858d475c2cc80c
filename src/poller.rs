//! Socket Readiness Poller
//!
//! A registry of sockets polled for the "ready to receive" event, plus the
//! translation of interrupts and context teardown into an observational
//! `terminated` flag. Registration order is preserved and observable:
//! `wait` returns the first ready socket in registration order, `wait_all`
//! returns all of them in that order.
//!
//! The poller holds shared references to the sockets it watches; handle
//! identity is reference identity. Cloning a poller clones its registry
//! snapshot, and two clones watching the same socket both observe it as
//! ready until one of them consumes the pending message.

use crate::error::{Error, Result};
use crate::interrupt;
use std::fmt;
use std::ptr;
use std::time::Duration;
use tracing::{debug, trace};

/// Convert an optional wait budget into libzmq poll milliseconds.
///
/// `None` maps to an infinite wait. Partial milliseconds round up so a
/// caller waiting for a near-due timer cannot wake a tick early and spin.
pub(crate) fn poll_timeout_ms(timeout: Option<Duration>) -> i64 {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(i64::MAX as u128) as i64
        }
    }
}

/// Multiplexes receive readiness across a set of sockets
pub struct Poller<'s> {
    sockets: Vec<&'s zmq::Socket>,
    interruptible: bool,
    terminated: bool,
}

impl<'s> Poller<'s> {
    /// Create an empty poller; interruptible by default
    pub fn new() -> Self {
        Self {
            sockets: Vec::new(),
            interruptible: true,
            terminated: false,
        }
    }

    /// Register a socket for receive readiness.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if the same socket is
    /// already in the registry.
    pub fn add(&mut self, socket: &'s zmq::Socket) -> Result<()> {
        if self.sockets.iter().any(|s| ptr::eq(*s, socket)) {
            return Err(Error::AlreadyRegistered);
        }
        self.sockets.push(socket);
        Ok(())
    }

    /// Remove a socket from the registry; no-op if it is not present
    pub fn remove(&mut self, socket: &zmq::Socket) {
        self.sockets.retain(|s| !ptr::eq(*s, socket));
    }

    /// Control whether a set interrupt latch terminates the wait
    /// (default) or is treated as a mere wakeup
    pub fn set_interruptible(&mut self, interruptible: bool) {
        self.interruptible = interruptible;
    }

    /// Number of registered sockets
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Whether the most recent wait ended because the interrupt latch was
    /// set while interruptible, or because the context was torn down
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Wait for the first socket ready to receive, in registration order.
    ///
    /// Returns `None` when the timeout elapses, when interrupted, or when
    /// the underlying context was torn down; check [`Poller::terminated`]
    /// to tell the latter two apart from a timeout.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Option<&'s zmq::Socket>> {
        Ok(self.poll_ready(timeout)?.into_iter().next())
    }

    /// Wait and return every socket ready to receive, in registration
    /// order. An empty result is a valid outcome.
    pub fn wait_all(&mut self, timeout: Option<Duration>) -> Result<Vec<&'s zmq::Socket>> {
        self.poll_ready(timeout)
    }

    fn poll_ready(&mut self, timeout: Option<Duration>) -> Result<Vec<&'s zmq::Socket>> {
        self.terminated = false;

        if self.interruptible && interrupt::is_set() {
            debug!("poll skipped: interrupt latch already set");
            self.terminated = true;
            return Ok(Vec::new());
        }

        let mut items: Vec<zmq::PollItem> = self
            .sockets
            .iter()
            .map(|&s| s.as_poll_item(zmq::POLLIN))
            .collect();

        let ready = match zmq::poll(&mut items, poll_timeout_ms(timeout)) {
            Ok(n) => n,
            Err(zmq::Error::EINTR) => {
                trace!(interruptible = self.interruptible, "poll interrupted");
                if self.interruptible {
                    self.terminated = true;
                }
                return Ok(Vec::new());
            }
            Err(zmq::Error::ETERM) => {
                debug!("poll ended: context terminated");
                self.terminated = true;
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        // The signal may have landed between the latch check above and the
        // blocking call, on platforms where the syscall does not wake.
        if self.interruptible && interrupt::is_set() {
            self.terminated = true;
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        if ready > 0 {
            for (index, item) in items.iter().enumerate() {
                if item.is_readable() {
                    result.push(self.sockets[index]);
                }
            }
        }
        Ok(result)
    }
}

impl Default for Poller<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Poller<'_> {
    fn clone(&self) -> Self {
        Self {
            sockets: self.sockets.clone(),
            interruptible: self.interruptible,
            terminated: self.terminated,
        }
    }
}

impl fmt::Debug for Poller<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("sockets", &self.sockets.len())
            .field("interruptible", &self.interruptible)
            .field("terminated", &self.terminated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_push(ctx: &zmq::Context, addr: &str) -> (zmq::Socket, zmq::Socket) {
        let pull = ctx.socket(zmq::PULL).unwrap();
        pull.bind(addr).unwrap();
        let push = ctx.socket(zmq::PUSH).unwrap();
        push.connect(addr).unwrap();
        (pull, push)
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let ctx = zmq::Context::new();
        let (pull, _push) = pull_push(&ctx, "inproc://poller-dup");

        let mut poller = Poller::new();
        poller.add(&pull).unwrap();
        assert!(matches!(poller.add(&pull), Err(Error::AlreadyRegistered)));
        assert_eq!(poller.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let ctx = zmq::Context::new();
        let (pull, _push) = pull_push(&ctx, "inproc://poller-remove");

        let mut poller = Poller::new();
        poller.remove(&pull);
        assert!(poller.is_empty());

        poller.add(&pull).unwrap();
        poller.remove(&pull);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_wait_times_out_empty() {
        let ctx = zmq::Context::new();
        let (pull, _push) = pull_push(&ctx, "inproc://poller-timeout");

        let mut poller = Poller::new();
        poller.add(&pull).unwrap();
        let ready = poller.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_none());
        assert!(!poller.terminated());
    }

    #[test]
    fn test_wait_returns_first_in_registration_order() {
        let ctx = zmq::Context::new();
        let (pull_a, push_a) = pull_push(&ctx, "inproc://poller-order-a");
        let (pull_b, push_b) = pull_push(&ctx, "inproc://poller-order-b");

        let mut poller = Poller::new();
        poller.add(&pull_a).unwrap();
        poller.add(&pull_b).unwrap();

        push_b.send("b", 0).unwrap();
        push_a.send("a", 0).unwrap();

        let ready = poller
            .wait(Some(Duration::from_millis(100)))
            .unwrap()
            .expect("a socket must be ready");
        assert!(std::ptr::eq(ready, &pull_a));

        let all = poller.wait_all(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(all.len(), 2);
        assert!(std::ptr::eq(all[0], &pull_a));
        assert!(std::ptr::eq(all[1], &pull_b));
    }

    #[test]
    fn test_clones_observe_the_same_readiness() {
        let ctx = zmq::Context::new();
        let (pull, push) = pull_push(&ctx, "inproc://poller-clone");

        let mut poller = Poller::new();
        poller.add(&pull).unwrap();
        let mut copy = poller.clone();

        push.send("shared", 0).unwrap();

        let seen_a = poller.wait(Some(Duration::from_millis(100))).unwrap();
        let seen_b = copy.wait(Some(Duration::from_millis(100))).unwrap();
        assert!(seen_a.is_some());
        assert!(seen_b.is_some());

        // Consuming from one clone drains the shared socket for both.
        pull.recv_msg(0).unwrap();
        assert!(copy.wait(Some(Duration::from_millis(10))).unwrap().is_none());
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(5))), 5);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(1500))), 2);
    }
}
