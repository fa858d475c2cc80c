//! Control Signal Frames
//!
//! The actor handshake rides on three control signals exchanged over the
//! same PAIR channel that carries user traffic. A signal is an 8-byte
//! little-endian frame: the high 56 bits hold a fixed discriminator, the
//! low byte holds the tag. Any payload of a different length, or whose
//! high bits do not match the discriminator, is user traffic and parses as
//! "not a signal".

/// Discriminator carried in the high 56 bits of every signal frame.
///
/// The value is arbitrary; it only has to make an accidental collision
/// with user payloads negligible. Eight-byte user messages collide with
/// probability 3 / 2^56.
const SIGNAL_DISCRIMINATOR: u64 = 0x7766_5544_3322_1100;

/// Size of an encoded signal frame in bytes
pub const SIGNAL_FRAME_SIZE: usize = 8;

/// Control signal exchanged between an actor and its worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Worker initialized (first ack) or finished cleanly (final ack)
    Success = 1,
    /// Worker failed to initialize or finished reporting failure
    Failure = 2,
    /// Creator requests a cooperative shutdown
    Stop = 3,
}

impl Signal {
    /// Encode the signal into its wire frame
    pub fn frame(self) -> [u8; SIGNAL_FRAME_SIZE] {
        (SIGNAL_DISCRIMINATOR | self as u64).to_le_bytes()
    }

    /// Parse a received payload; returns `None` for anything that is not
    /// a well-formed signal frame
    pub fn decode(payload: &[u8]) -> Option<Signal> {
        let bytes: [u8; SIGNAL_FRAME_SIZE] = payload.try_into().ok()?;
        let value = u64::from_le_bytes(bytes);
        if value & !0xFF != SIGNAL_DISCRIMINATOR {
            return None;
        }
        match value & 0xFF {
            1 => Some(Signal::Success),
            2 => Some(Signal::Failure),
            3 => Some(Signal::Stop),
            _ => None,
        }
    }

    /// Whether this is the success signal
    pub fn is_success(self) -> bool {
        self == Signal::Success
    }

    /// Whether this is the failure signal
    pub fn is_failure(self) -> bool {
        self == Signal::Failure
    }

    /// Whether this is the stop signal
    pub fn is_stop(self) -> bool {
        self == Signal::Stop
    }
}
