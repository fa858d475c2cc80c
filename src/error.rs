//! Toolkit Error Types
//!
//! Error handling for the poller registry, the event loop's timer table,
//! and the actor lifecycle protocol. Failures coming out of libzmq are
//! wrapped unchanged; the toolkit only adds the conditions the underlying
//! library cannot express.

use thiserror::Error;

/// Main toolkit error type
#[derive(Error, Debug)]
pub enum Error {
    /// The socket is already part of this poller's registry
    #[error("socket is already registered with this poller")]
    AlreadyRegistered,

    /// `start` was called on an actor that was started before
    #[error("actor already started")]
    AlreadyStarted,

    /// The worker reported a failed initialization without panicking
    #[error("actor initialization failed")]
    InitFailed,

    /// The start acknowledgement never arrived (the worker's context was
    /// torn down, or its endpoint closed before the first signal)
    #[error("failed to receive actor initialization signal")]
    InitSignalLost,

    /// The actor's parent endpoint has already been closed
    #[error("actor endpoint is closed")]
    EndpointClosed,

    /// The timer-id counter wrapped and every remaining id is live
    #[error("timer id space exhausted")]
    TimerIdsExhausted,

    /// The OS refused to spawn the actor's worker thread
    #[error("failed to spawn actor worker thread")]
    SpawnWorker(#[source] std::io::Error),

    /// Any other failure surfaced by the messaging library
    #[error(transparent)]
    Socket(#[from] zmq::Error),
}

/// Result type alias for toolkit operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_error_conversion() {
        let err = Error::from(zmq::Error::ETERM);
        match err {
            Error::Socket(inner) => assert_eq!(inner, zmq::Error::ETERM),
            other => panic!("expected Socket error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::AlreadyStarted.to_string(),
            "actor already started"
        );
        assert_eq!(
            Error::TimerIdsExhausted.to_string(),
            "timer id space exhausted"
        );
    }
}
