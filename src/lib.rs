//! # zmqkit
//!
//! A small concurrency toolkit layered over ZeroMQ's PAIR sockets and
//! poll primitive:
//!
//! - [`Poller`] — readiness multiplexing across a set of sockets, with
//!   interrupt and context-teardown translation
//! - [`EventLoop`] — timers plus socket dispatch on top of the poller
//! - [`Actor`] — a user function on a detached worker thread, with a
//!   signal-based start/stop handshake over a paired in-process channel
//! - [`interrupt`] — a process-wide latch fed by SIGINT/SIGTERM and
//!   consumed cooperatively by the poller
//!
//! The toolkit does not own the messaging context: callers create a
//! `zmq::Context`, build sockets and actors inside it, and keep it alive
//! for as long as any worker runs. Tearing the context down makes every
//! blocking call fail, which the poller and loop report as
//! `terminated()`.
//!
//! ```no_run
//! use std::time::Duration;
//! use zmqkit::{Actor, Signal};
//!
//! # fn main() -> zmqkit::Result<()> {
//! let ctx = zmq::Context::new();
//! let mut actor = Actor::new(&ctx)?;
//! actor.start(|socket| {
//!     socket.send(&Signal::Success.frame()[..], 0).unwrap();
//!     loop {
//!         let msg = socket.recv_msg(0).unwrap();
//!         if Signal::decode(&msg) == Some(Signal::Stop) {
//!             return true;
//!         }
//!         // handle user traffic
//!     }
//! })?;
//! actor.socket().unwrap().send("ping", 0)?;
//! assert!(actor.stop(Some(Duration::from_millis(100))));
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod error;
pub mod event_loop;
pub mod interrupt;
pub mod poller;
pub mod retry;
pub mod signal;

pub use actor::Actor;
pub use error::{Error, Result};
pub use event_loop::{EventLoop, TimerId};
pub use poller::Poller;
pub use signal::{Signal, SIGNAL_FRAME_SIZE};
