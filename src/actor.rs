//! Paired-Socket Actor
//!
//! Runs a user function on a dedicated worker thread and keeps a PAIR
//! channel between the creator and the worker. Startup and shutdown are
//! synchronized over that channel with the control signals from
//! [`crate::signal`]:
//!
//! 1. **start ack** — the user function sends [`Signal::Success`] once its
//!    initialization is done; `start` blocks until the first signal
//!    arrives and fails on anything else.
//! 2. **runtime** — user traffic flows freely in both directions.
//! 3. **stop ack** — `stop` sends [`Signal::Stop`] and waits (within its
//!    budget) for any signal coming back; the worker sends a final
//!    success/failure signal when the user function returns.
//!
//! The worker thread is detached. Its endpoint is moved into it at start
//! and closed there on every exit path; that close is the only way the
//! creator observes worker termination. A worker that never looks at its
//! endpoint survives a timed-out stop as a zombie and exits on its own
//! once the user function returns.

use crate::error::{Error, Result};
use crate::retry;
use crate::signal::Signal;
use parking_lot::Mutex;
use rand::Rng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default budget for the stop performed on drop
const DEFAULT_DROP_TIMEOUT: Duration = Duration::from_millis(100);

/// Panic payload captured on the worker thread, awaiting re-raise on the
/// creator. Jointly owned: the detached worker may outlive the actor.
#[derive(Default)]
struct PanicSlot {
    payload: Mutex<Option<Box<dyn Any + Send>>>,
}

impl PanicSlot {
    fn store(&self, payload: Box<dyn Any + Send>) {
        *self.payload.lock() = Some(payload);
    }

    fn take(&self) -> Option<Box<dyn Any + Send>> {
        self.payload.lock().take()
    }
}

/// Actor running a user function on its own detached worker thread
pub struct Actor {
    parent: Option<zmq::Socket>,
    child: Option<zmq::Socket>,
    panic_slot: Arc<PanicSlot>,
    started: bool,
    stopped: bool,
    drop_timeout: Option<Duration>,
}

impl Actor {
    /// Create the paired channel inside `context`.
    ///
    /// The parent endpoint binds to a unique `inproc://` address (random
    /// suffix, retried while the address is taken) and the child endpoint
    /// connects to it. No thread is started yet.
    pub fn new(context: &zmq::Context) -> Result<Actor> {
        let parent = context.socket(zmq::PAIR)?;
        let child = context.socket(zmq::PAIR)?;
        let panic_slot = Arc::new(PanicSlot::default());

        let address = bind_unique(&parent, Arc::as_ptr(&panic_slot) as usize)?;
        child.connect(&address)?;
        trace!(address = %address, "actor channel bound");

        Ok(Actor {
            parent: Some(parent),
            child: Some(child),
            panic_slot,
            started: false,
            stopped: false,
            drop_timeout: Some(DEFAULT_DROP_TIMEOUT),
        })
    }

    /// Spawn the worker thread and block until it acknowledges startup.
    ///
    /// The user function receives the child endpoint and must send
    /// [`Signal::Success`] on it as soon as it is ready to process
    /// messages; after that it should keep serving the endpoint until a
    /// [`Signal::Stop`] arrives, then return `true`.
    ///
    /// Fails with [`Error::AlreadyStarted`] on a second call. If the
    /// worker reports a failed initialization this re-raises the worker's
    /// panic when one was captured, and fails with [`Error::InitFailed`]
    /// otherwise.
    pub fn start<F>(&mut self, func: F) -> Result<()>
    where
        F: FnOnce(&zmq::Socket) -> bool + Send + 'static,
    {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let Some(child) = self.child.take() else {
            return Err(Error::AlreadyStarted);
        };

        let slot = Arc::clone(&self.panic_slot);
        let spawned = thread::Builder::new()
            .name("zmqkit-actor".into())
            .spawn(move || execute(func, child, slot));
        if let Err(err) = spawned {
            // The closure was dropped, closing the child endpoint.
            self.started = true;
            self.mark_stopped_and_close();
            return Err(Error::SpawnWorker(err));
        }
        self.started = true;
        debug!("actor worker spawned, awaiting start ack");

        let Some(parent) = self.parent.as_ref() else {
            return Err(Error::EndpointClosed);
        };
        match retry::recv_msg(parent, 0) {
            Ok(msg) => match Signal::decode(&msg) {
                Some(Signal::Success) => {
                    debug!("actor started");
                    Ok(())
                }
                parsed => {
                    // Failure signal, or a user payload where the protocol
                    // guarantees a signal: both mean initialization failed.
                    trace!(?parsed, "start ack was not success");
                    self.mark_stopped_and_close();
                    if let Some(payload) = self.panic_slot.take() {
                        panic::resume_unwind(payload);
                    }
                    Err(Error::InitFailed)
                }
            },
            Err(err) => {
                warn!(error = %err, "start ack never arrived");
                self.mark_stopped_and_close();
                Err(Error::InitSignalLost)
            }
        }
    }

    /// Ask the worker to stop and wait up to `timeout` for its final
    /// signal. `None` waits forever, `Some(ZERO)` only polls.
    ///
    /// Returns `true` when the worker acknowledged (or had already
    /// finished), `false` when the budget ran out first; in that case the
    /// worker lives on as a zombie until its user function returns. In
    /// every case the actor is stopped and the parent endpoint closed
    /// when this returns. Idempotent: stopping twice, or before start,
    /// reports `true`.
    pub fn stop(&mut self, timeout: Option<Duration>) -> bool {
        if !self.started || self.stopped {
            return true;
        }
        let acknowledged = match self.parent.as_ref() {
            Some(parent) => shutdown_handshake(parent, timeout),
            None => true,
        };
        self.mark_stopped_and_close();
        debug!(acknowledged, "actor stopped");
        acknowledged
    }

    /// Parent endpoint for exchanging messages with the worker; `None`
    /// once the actor is stopped. Creator-thread use only.
    pub fn socket(&self) -> Option<&zmq::Socket> {
        self.parent.as_ref()
    }

    /// Whether the worker thread was ever spawned
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the actor reached its terminal state
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Budget the destructor passes to [`Actor::stop`]
    pub fn drop_timeout(&self) -> Option<Duration> {
        self.drop_timeout
    }

    /// Override the destructor's stop budget (`None` waits forever)
    pub fn set_drop_timeout(&mut self, timeout: Option<Duration>) {
        self.drop_timeout = timeout;
    }

    fn mark_stopped_and_close(&mut self) {
        self.stopped = true;
        self.parent = None;
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        // Best effort: a zombie worker is reported by `stop` returning
        // false, which a destructor has no way to surface.
        let _ = self.stop(self.drop_timeout);
    }
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("started", &self.started)
            .field("stopped", &self.stopped)
            .field("drop_timeout", &self.drop_timeout)
            .finish()
    }
}

/// Worker-thread body: run the user function once, translate its outcome
/// into the final signal, and close the child endpoint.
fn execute<F>(func: F, socket: zmq::Socket, slot: Arc<PanicSlot>)
where
    F: FnOnce(&zmq::Socket) -> bool + Send + 'static,
{
    let verdict = panic::catch_unwind(AssertUnwindSafe(|| func(&socket)));
    let ack = match verdict {
        Ok(true) => Signal::Success,
        Ok(false) => Signal::Failure,
        Err(payload) => {
            slot.store(payload);
            Signal::Failure
        }
    };
    // Non-blocking: if the creator already closed its endpoint there is
    // nobody left to read the ack, and the worker must still exit.
    if let Err(err) = retry::send(&socket, &ack.frame(), zmq::DONTWAIT) {
        trace!(error = %err, "final actor signal not delivered");
    }
    // Dropping the socket closes the child endpoint; this close is what
    // the creator's receive loop eventually observes.
    drop(socket);
}

/// Send the stop signal and drain the channel until any signal arrives
/// or the budget runs out. Returns whether the shutdown was acknowledged.
fn shutdown_handshake(parent: &zmq::Socket, timeout: Option<Duration>) -> bool {
    if let Err(err) = retry::send(parent, &Signal::Stop.frame(), zmq::DONTWAIT) {
        // The worker already closed its endpoint; nothing to wait for.
        trace!(error = %err, "stop signal not sent, worker gone");
        return true;
    }

    let started_at = Instant::now();
    let mut budget_ms = rcvtimeo_ms(timeout);
    loop {
        if let Err(err) = parent.set_rcvtimeo(budget_ms) {
            warn!(error = %err, "failed to arm stop receive timeout");
            return false;
        }
        let msg = match retry::recv_msg(parent, 0) {
            Ok(msg) => msg,
            Err(zmq::Error::EAGAIN) => return false,
            Err(err) => {
                warn!(error = %err, "receive failed during stop handshake");
                return false;
            }
        };
        if Signal::decode(&msg).is_some() {
            return true;
        }
        // A user payload racing the shutdown: discard and keep waiting on
        // whatever budget is left.
        trace!(len = msg.len(), "discarding non-signal payload during stop");
        if let Some(total) = timeout {
            let remaining = total.saturating_sub(started_at.elapsed());
            budget_ms = rcvtimeo_ms(Some(remaining));
        }
    }
}

/// Clamp an optional budget into the range of the receive-timeout socket
/// option: -1 for infinite, otherwise whole milliseconds rounded up.
fn rcvtimeo_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
    }
}

/// Bind `parent` to a fresh in-process address derived from the actor's
/// identity plus a random six-decimal suffix, retrying on collisions.
fn bind_unique(parent: &zmq::Socket, token: usize) -> Result<String> {
    let mut rng = rand::thread_rng();
    loop {
        let address = format!(
            "inproc://zmqkit-actor-{:x}-{:06}",
            token,
            rng.gen_range(0..1_000_000)
        );
        match parent.bind(&address) {
            Ok(()) => return Ok(address),
            Err(zmq::Error::EADDRINUSE) => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rcvtimeo_clamps_and_rounds() {
        assert_eq!(rcvtimeo_ms(None), -1);
        assert_eq!(rcvtimeo_ms(Some(Duration::ZERO)), 0);
        assert_eq!(rcvtimeo_ms(Some(Duration::from_millis(10))), 10);
        assert_eq!(rcvtimeo_ms(Some(Duration::from_micros(500))), 1);
        assert_eq!(rcvtimeo_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn test_new_actor_is_idle() {
        let ctx = zmq::Context::new();
        let actor = Actor::new(&ctx).unwrap();
        assert!(!actor.is_started());
        assert!(!actor.is_stopped());
        assert!(actor.socket().is_some());
        assert_eq!(actor.drop_timeout(), Some(DEFAULT_DROP_TIMEOUT));
    }

    #[test]
    fn test_stop_before_start_is_idempotent_true() {
        let ctx = zmq::Context::new();
        let mut actor = Actor::new(&ctx).unwrap();
        assert!(actor.stop(Some(Duration::ZERO)));
        // stop before start leaves the actor unstarted and usable
        assert!(!actor.is_started());
    }
}
