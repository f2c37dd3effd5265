//! GDB Remote Serial Protocol framing.
//!
//! A packet travels on the wire as `$<payload>#<cc>`, where `cc` is the
//! modulo-256 sum of every byte between `$` and `#`, written as two lowercase
//! hex digits. Payload bytes that would be mistaken for framing (`$`, `#` and
//! `}`) are sent as `}` followed by the byte XORed with `0x20`. The checksum is
//! computed over the bytes *as sent*, escape markers included, not over the
//! logical payload.
//!
//! Each side acknowledges a packet with a bare `+` (accepted) or `-` (rejected,
//! please resend). A bare `0x03` asks the probe to halt the target.
//!
//! The [`Receiver`] rebuilds packets one byte at a time and hands valid ones to
//! a [`CommandInterpreter`](crate::CommandInterpreter); the
//! [encoder](encoder) frames outgoing payloads into a
//! [`Transport`](crate::Transport).

pub mod encoder;
mod receiver;

pub use encoder::{checksum, encode_packet};
pub use receiver::{Receiver, RxEvent, RxState};

/// Start of a packet.
pub const PACKET_START: u8 = b'$';
/// End of a packet payload, followed by two checksum digits.
pub const PACKET_END: u8 = b'#';
/// Escape marker; the next byte is XORed with [`ESCAPE_XOR`].
pub const ESCAPE: u8 = b'}';
pub const ESCAPE_XOR: u8 = 0x20;
/// Positive acknowledgement.
pub const ACK: u8 = b'+';
/// Negative acknowledgement.
pub const NACK: u8 = b'-';
/// Out-of-band interrupt (ctrl-c).
pub const INTERRUPT: u8 = 0x03;

/// Error reply sent when the interpreter lost the target.
pub const TARGET_LOST_REPLY: &[u8] = b"EFF";

// =============================================================================
// Unit Tests
// =============================================================================
