//! RSP transmit side: packet framing and the convenience senders built on it.

use std::fmt::{self, Write as _};

use log::{debug, trace};

use super::{ESCAPE, ESCAPE_XOR, PACKET_END, PACKET_START};
use crate::transport::Transport;

/// Modulo-256 sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, PACKET_START | PACKET_END | ESCAPE)
}

/// Frame `payload` as `$<escaped payload>#cc`.
///
/// ```
/// use gdbcom::rsp::encode_packet;
///
/// assert_eq!(encode_packet(b"OK"), b"$OK#9a");
/// assert_eq!(encode_packet(b"a$"), b"$a}\x04#e2");
/// ```
pub fn encode_packet(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(PACKET_START);
    for &b in payload {
        if needs_escape(b) {
            frame.push(ESCAPE);
            frame.push(b ^ ESCAPE_XOR);
        } else {
            frame.push(b);
        }
    }
    // The escape markers are part of the sum.
    let sum = checksum(&frame[1..]);
    frame.push(PACKET_END);
    frame.extend_from_slice(hex::encode([sum]).as_bytes());
    frame
}

impl Transport {
    /// Queue `payload` as one packet and request a flush. The debugger is
    /// expected to acknowledge it.
    pub fn send_packet(&mut self, payload: &[u8]) {
        let frame = encode_packet(payload);
        trace!("tx packet {:?}", String::from_utf8_lossy(&frame));
        self.write(&frame);
        self.request_flush();
        self.request_ack();
    }

    /// Queue a single unframed byte, such as an acknowledgement.
    pub fn send_byte(&mut self, byte: u8) {
        trace!("tx byte {:?}", char::from(byte));
        self.write(&[byte]);
        self.request_flush();
    }

    /// Format a payload and send it as one packet.
    ///
    /// ```
    /// let mut transport = gdbcom::Transport::new(64);
    /// transport.send_fmt(format_args!("T{:02x}", 5));
    /// ```
    pub fn send_fmt(&mut self, args: fmt::Arguments<'_>) {
        let mut payload = String::new();
        if payload.write_fmt(args).is_err() {
            debug!("packet formatting failed");
            return;
        }
        self.send_packet(payload.as_bytes());
    }

    /// Print `text` on the debugger's console (an `O` packet).
    pub fn console_out(&mut self, text: &str) {
        let mut payload = String::with_capacity(1 + 2 * text.len());
        payload.push('O');
        payload.push_str(&hex::encode(text));
        self.send_packet(payload.as_bytes());
    }

    /// Formatted variant of [`console_out`](Self::console_out).
    pub fn console_outf(&mut self, args: fmt::Arguments<'_>) {
        self.console_out(&fmt::format(args));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
