//! EINTR-Transparent Send and Receive
//!
//! Thin wrappers over the socket send/receive calls that retry while the
//! underlying syscall reports an interrupted call. Every other outcome,
//! including EAGAIN from a non-blocking or timed call, passes through to
//! the caller untouched.

/// Send `payload`, retrying while the call is interrupted by a signal.
pub fn send(socket: &zmq::Socket, payload: &[u8], flags: i32) -> zmq::Result<()> {
    loop {
        match socket.send(payload, flags) {
            Err(zmq::Error::EINTR) => continue,
            other => return other,
        }
    }
}

/// Receive one message, retrying while the call is interrupted by a signal.
pub fn recv_msg(socket: &zmq::Socket, flags: i32) -> zmq::Result<zmq::Message> {
    loop {
        match socket.recv_msg(flags) {
            Err(zmq::Error::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_recv_passthrough() {
        let ctx = zmq::Context::new();
        let pull = ctx.socket(zmq::PULL).unwrap();
        pull.bind("inproc://retry-passthrough").unwrap();
        let push = ctx.socket(zmq::PUSH).unwrap();
        push.connect("inproc://retry-passthrough").unwrap();

        send(&push, b"payload", 0).unwrap();
        let msg = recv_msg(&pull, 0).unwrap();
        assert_eq!(msg.as_str(), Some("payload"));
    }

    #[test]
    fn test_recv_surfaces_eagain() {
        let ctx = zmq::Context::new();
        let pull = ctx.socket(zmq::PULL).unwrap();
        pull.bind("inproc://retry-eagain").unwrap();

        let err = recv_msg(&pull, zmq::DONTWAIT).unwrap_err();
        assert_eq!(err, zmq::Error::EAGAIN);
    }
}
