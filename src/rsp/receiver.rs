//! RSP receive state machine.
//!
//! The machine is fed one raw byte at a time, in arrival order, and never
//! buffers anything beyond the packet currently being assembled, so the way
//! inbound bytes happen to be chunked by the transport has no influence on
//! what gets dispatched.
//!
//! ```text
//!  state      input        next       action
//!  Idle       '$'          Char       start a packet
//!  Idle       0x03         Idle       halt the target
//!  Char       '$'          Char       restart the packet
//!  Char       '#'          Checksum1
//!  Char       '}'          Escape
//!  Char       other        Char       append
//!  Escape     any          Char       append byte ^ 0x20
//!  Checksum1  any          Checksum2
//!  Checksum2  any          Idle       '+' and dispatch, or '-'
//!  AckWait    '+' | '-'    Idle
//!  AckWait    '$'          Char       start a packet
//! ```
//!
//! Overflowing the packet buffer, in `Char` or `Escape`, sends a negative
//! acknowledgement and goes back to `Idle`.

use log::{debug, log_enabled, trace, warn, Level::Debug};

use super::{ACK, ESCAPE, ESCAPE_XOR, INTERRUPT, NACK, PACKET_END, PACKET_START, TARGET_LOST_REPLY};
use crate::target::{CommandError, CommandInterpreter};
use crate::transport::Transport;

// =============================================================================
// Public Interface
// =============================================================================

/// States of the receive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Between packets.
    Idle,
    /// Collecting payload bytes.
    Char,
    /// The previous byte was the escape marker.
    Escape,
    /// Waiting for the first checksum digit.
    Checksum1,
    /// Waiting for the second checksum digit.
    Checksum2 { high: u8 },
    /// A packet was sent; waiting for the peer's acknowledgement.
    AckWait,
}

/// What a byte fed to the [`Receiver`] caused, beyond a plain state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// `0x03` received between packets; the interpreter was asked to halt.
    HaltRequested,
    /// A valid packet of `len` payload bytes was acknowledged and dispatched.
    Dispatched { len: usize },
    /// The interpreter reported a recoverable error, answered with `Exx`.
    CommandFailed(u8),
    /// The interpreter lost the target; `EFF` was sent and the target list
    /// torn down.
    TargetLost(String),
    /// The checksum did not match; the packet was rejected.
    ChecksumMismatch,
    /// The packet did not fit in the buffer; it was rejected.
    Overflow,
    /// The peer acknowledged our last packet.
    Acked,
    /// The peer rejected our last packet.
    AckFailed,
}

/// Reassembles and validates inbound packets.
#[derive(Debug)]
pub struct Receiver {
    state: RxState,
    packet: Vec<u8>,
    max_packet_size: usize,
    checksum: u8,
    ack_failures: u64,
}
impl Receiver {
    /// Create a receiver accepting payloads of up to `max_packet_size` bytes.
    pub fn new(max_packet_size: usize) -> Self {
        Receiver {
            state: RxState::Idle,
            packet: Vec::with_capacity(max_packet_size),
            max_packet_size,
            checksum: 0,
            ack_failures: 0,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Number of packets the peer rejected since this receiver was created.
    pub fn ack_failures(&self) -> u64 {
        self.ack_failures
    }

    /// Wait for the peer to acknowledge the packet just sent.
    pub fn expect_ack(&mut self) {
        self.state = RxState::AckWait;
    }

    /// Drop any partial packet and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.restart();
    }

    /// Advance the state machine by one byte. Acknowledgements and replies go
    /// to `transport`; valid packets to `interpreter`.
    pub fn feed<C>(
        &mut self,
        byte: u8,
        transport: &mut Transport,
        interpreter: &mut C,
    ) -> Option<RxEvent>
    where
        C: CommandInterpreter + ?Sized,
    {
        let from = self.state;
        let event = match self.state {
            RxState::Idle => {
                if byte == PACKET_START {
                    self.start_packet();
                    None
                } else if byte == INTERRUPT {
                    debug!("halt requested");
                    interpreter.halt();
                    Some(RxEvent::HaltRequested)
                } else {
                    None
                }
            }
            RxState::Char => match byte {
                PACKET_START => {
                    self.start_packet();
                    None
                }
                PACKET_END => {
                    self.state = RxState::Checksum1;
                    None
                }
                ESCAPE => {
                    self.checksum = self.checksum.wrapping_add(byte);
                    self.state = RxState::Escape;
                    None
                }
                _ => self.accept(byte, byte, transport),
            },
            RxState::Escape => {
                let event = self.accept(byte ^ ESCAPE_XOR, byte, transport);
                if event.is_none() {
                    self.state = RxState::Char;
                }
                event
            }
            RxState::Checksum1 => {
                self.state = RxState::Checksum2 { high: byte };
                None
            }
            RxState::Checksum2 { high } => {
                let event = self.complete(high, byte, transport, interpreter);
                self.reset();
                Some(event)
            }
            RxState::AckWait => match byte {
                ACK => {
                    self.reset();
                    Some(RxEvent::Acked)
                }
                NACK => {
                    warn!("ack error");
                    self.ack_failures += 1;
                    self.reset();
                    Some(RxEvent::AckFailed)
                }
                PACKET_START => {
                    self.start_packet();
                    None
                }
                _ => None,
            },
        };
        trace!(
            "rx {:?} {:#04x} ({}) -> {:?}",
            from,
            byte,
            if byte.is_ascii_graphic() { byte as char } else { ' ' },
            self.state
        );
        event
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    fn restart(&mut self) {
        self.packet.clear();
        self.checksum = 0;
    }

    fn start_packet(&mut self) {
        self.restart();
        self.state = RxState::Char;
    }

    /// Append `byte` to the payload, summing `wire` into the checksum. Rejects
    /// the packet when the buffer is already full.
    fn accept(&mut self, byte: u8, wire: u8, transport: &mut Transport) -> Option<RxEvent> {
        if self.packet.len() == self.max_packet_size {
            warn!("packet buffer overflow");
            transport.send_byte(NACK);
            self.reset();
            return Some(RxEvent::Overflow);
        }
        self.packet.push(byte);
        self.checksum = self.checksum.wrapping_add(wire);
        None
    }

    fn complete<C>(
        &mut self,
        high: u8,
        low: u8,
        transport: &mut Transport,
        interpreter: &mut C,
    ) -> RxEvent
    where
        C: CommandInterpreter + ?Sized,
    {
        let received = match (unhex_digit(high), unhex_digit(low)) {
            (Some(h), Some(l)) => Some(h << 4 | l),
            _ => None,
        };
        if received != Some(self.checksum) {
            warn!(
                "checksum fail: computed {:02x}, received {}{}",
                self.checksum,
                char::from(high),
                char::from(low)
            );
            transport.send_byte(NACK);
            return RxEvent::ChecksumMismatch;
        }

        transport.send_byte(ACK);
        if log_enabled!(Debug) {
            let view = hexplay::HexViewBuilder::new(&self.packet[..])
                .address_offset(0)
                .row_width(16)
                .finish();
            debug!("packet ({} bytes)\n{}", self.packet.len(), view);
        }

        let len = self.packet.len();
        let result = interpreter.handle_packet(&self.packet, transport);
        // Replies sent while dispatching are not waited for; the machine goes
        // back to `Idle` regardless.
        transport.take_ack_request();
        match result {
            Ok(()) => RxEvent::Dispatched { len },
            Err(CommandError::Errno(errno)) => {
                transport.send_fmt(format_args!("E{:02X}", errno));
                transport.take_ack_request();
                RxEvent::CommandFailed(errno)
            }
            Err(CommandError::Fatal(reason)) => {
                warn!("target lost: {}", reason);
                transport.send_packet(TARGET_LOST_REPLY);
                transport.take_ack_request();
                interpreter.target_lost();
                RxEvent::TargetLost(reason)
            }
        }
    }
}

fn unhex_digit(c: u8) -> Option<u8> {
    char::from(c).to_digit(16).map(|d| d as u8)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsp::encode_packet;
    use crate::test_utils::{MockStream, Recorder};
    use crate::transport::StreamBackend;

    struct Harness {
        receiver: Receiver,
        transport: Transport,
        recorder: Recorder,
        wire: MockStream,
    }
    impl Harness {
        fn new(max_packet_size: usize) -> Self {
            let wire = MockStream::new();
            let mut transport = Transport::new(256);
            transport.attach(StreamBackend::new(Box::new(wire.clone())));
            Harness {
                receiver: Receiver::new(max_packet_size),
                transport,
                recorder: Recorder::default(),
                wire,
            }
        }

        fn feed(&mut self, bytes: &[u8]) -> Vec<RxEvent> {
            let mut events = Vec::new();
            for &b in bytes {
                if let Some(ev) = self.receiver.feed(b, &mut self.transport, &mut self.recorder) {
                    events.push(ev);
                }
            }
            events
        }

        fn sent(&mut self) -> Vec<u8> {
            self.transport.flush().unwrap();
            self.wire.sent()
        }
    }

    #[test]
    fn ping_is_acked_then_dispatched() {
        let mut h = Harness::new(64);
        let events = h.feed(b"$ping#ae");
        assert_eq!(events, vec![RxEvent::Dispatched { len: 4 }]);
        assert_eq!(h.recorder.packets, vec![b"ping".to_vec()]);
        // The '+' was queued before the interpreter ran.
        assert_eq!(h.recorder.pending_at_dispatch, vec![1]);
        assert_eq!(h.sent(), b"+");
        assert_eq!(h.receiver.state(), RxState::Idle);
    }

    #[test]
    fn uppercase_checksum_digits_are_accepted() {
        let mut h = Harness::new(64);
        assert_eq!(h.feed(b"$ping#AE"), vec![RxEvent::Dispatched { len: 4 }]);
    }

    #[test]
    fn escaped_hash_is_unescaped() {
        // '#' (0x23) escaped is '}' followed by 0x03.
        let mut h = Harness::new(64);
        let frame = encode_packet(b"a#b");
        assert_eq!(&frame[..6], b"$a}\x03b#");
        h.feed(&frame);
        assert_eq!(h.recorder.packets, vec![b"a#b".to_vec()]);
    }

    #[test]
    fn escaped_bytes_are_summed_as_sent() {
        let mut h = Harness::new(64);
        // "}]" carries '}' (0x7d ^ 0x20 = 0x5d). Wire sum: 0x7d + 0x5d = 0xda.
        h.feed(b"$}]#da");
        assert_eq!(h.recorder.packets, vec![b"}".to_vec()]);
    }

    #[test]
    fn wrong_checksum_is_nacked() {
        let mut h = Harness::new(64);
        assert_eq!(h.feed(b"$ping#00"), vec![RxEvent::ChecksumMismatch]);
        assert!(h.recorder.packets.is_empty());
        assert_eq!(h.sent(), b"-");
        assert_eq!(h.receiver.state(), RxState::Idle);
    }

    #[test]
    fn non_hex_checksum_is_nacked() {
        let mut h = Harness::new(64);
        assert_eq!(h.feed(b"$ping#zz"), vec![RxEvent::ChecksumMismatch]);
        assert!(h.recorder.packets.is_empty());
    }

    #[test]
    fn overflow_is_nacked_and_resynchronizes() {
        let mut h = Harness::new(4);
        assert_eq!(h.feed(b"$abcde"), vec![RxEvent::Overflow]);
        assert_eq!(h.receiver.state(), RxState::Idle);
        // Leftovers of the oversized packet are ignored; the next one is fine.
        h.feed(b"#00");
        h.feed(&encode_packet(b"abcd"));
        assert_eq!(h.recorder.packets, vec![b"abcd".to_vec()]);
        assert_eq!(h.sent(), b"-+");
    }

    #[test]
    fn overflow_on_escaped_byte() {
        let mut h = Harness::new(2);
        assert_eq!(h.feed(b"$ab}\x03"), vec![RxEvent::Overflow]);
        assert!(h.recorder.packets.is_empty());
    }

    #[test]
    fn dollar_restarts_the_frame() {
        let mut h = Harness::new(64);
        let mut input = b"$garbage".to_vec();
        input.extend_from_slice(&encode_packet(b"g"));
        h.feed(&input);
        assert_eq!(h.recorder.packets, vec![b"g".to_vec()]);
    }

    #[test]
    fn interrupt_only_between_packets() {
        let mut h = Harness::new(64);
        assert_eq!(h.feed(b"\x03"), vec![RxEvent::HaltRequested]);
        assert_eq!(h.recorder.halts, 1);

        // Inside a packet, 0x03 is payload.
        let mut frame = b"$a\x03".to_vec();
        let sum = b'a'.wrapping_add(0x03);
        frame.extend_from_slice(format!("#{:02x}", sum).as_bytes());
        h.feed(&frame);
        assert_eq!(h.recorder.halts, 1);
        assert_eq!(h.recorder.packets, vec![b"a\x03".to_vec()]);
    }

    #[test]
    fn noise_between_packets_is_ignored() {
        let mut h = Harness::new(64);
        assert!(h.feed(b"+-xyz#").is_empty());
        assert_eq!(h.receiver.state(), RxState::Idle);
    }

    #[test]
    fn ack_wait() {
        let mut h = Harness::new(64);
        h.receiver.expect_ack();
        assert!(h.feed(b"x").is_empty());
        assert_eq!(h.receiver.state(), RxState::AckWait);
        assert_eq!(h.feed(b"-"), vec![RxEvent::AckFailed]);
        assert_eq!(h.receiver.ack_failures(), 1);

        h.receiver.expect_ack();
        assert_eq!(h.feed(b"+"), vec![RxEvent::Acked]);
        assert_eq!(h.receiver.state(), RxState::Idle);
    }

    #[test]
    fn packet_while_waiting_for_ack() {
        let mut h = Harness::new(64);
        h.receiver.expect_ack();
        h.feed(&encode_packet(b"c"));
        assert_eq!(h.recorder.packets, vec![b"c".to_vec()]);
    }

    #[test]
    fn replies_during_dispatch_leave_the_machine_idle() {
        let mut h = Harness::new(64);
        h.recorder.reply = Some(b"OK".to_vec());
        h.feed(&encode_packet(b"?"));
        assert_eq!(h.receiver.state(), RxState::Idle);
        assert_eq!(h.sent(), b"+$OK#9a");
    }

    #[test]
    fn recoverable_command_error() {
        let mut h = Harness::new(64);
        h.recorder.fail_with = Some(CommandError::Errno(0x0e));
        assert_eq!(h.feed(&encode_packet(b"m0,4")), vec![RxEvent::CommandFailed(0x0e)]);
        assert_eq!(h.recorder.targets_lost, 0);
        assert_eq!(h.sent(), b"+$E0E#ba");
    }

    #[test]
    fn fatal_command_error_tears_the_target_down() {
        let mut h = Harness::new(64);
        h.recorder.fail_with = Some(CommandError::Fatal("swd timeout".into()));
        assert_eq!(
            h.feed(&encode_packet(b"g")),
            vec![RxEvent::TargetLost("swd timeout".into())]
        );
        assert_eq!(h.recorder.targets_lost, 1);
        assert_eq!(h.sent(), b"+$EFF#d1");
        assert_eq!(h.receiver.state(), RxState::Idle);
    }

    #[test]
    fn back_to_back_packets_in_order() {
        let mut h = Harness::new(64);
        let mut input = encode_packet(b"first");
        input.extend_from_slice(&encode_packet(b"second"));
        input.extend_from_slice(&encode_packet(b"third"));
        h.feed(&input);
        assert_eq!(
            h.recorder.packets,
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
    }
}
