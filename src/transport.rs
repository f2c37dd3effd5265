//! Packet buffering over the active transport backend.
//!
//! A [`Transport`] owns the transmit ring buffer and exactly one backend,
//! selected when the session is initialized:
//!
//! * **inactive**: nothing is connected; transmitted bytes are discarded.
//! * **stream**: any non-blocking [`ByteStream`], typically a serial port.
//!   Inbound bytes are read straight out of the stream during the service
//!   pass.
//! * **network**: a TCP listener serving one debugger at a time. Inbound
//!   bytes are delivered by a reader thread into a receive ring buffer, which
//!   the service pass drains.
//!
//! Outbound bytes are queued with [`Transport::write`] and only handed to the
//! backend when the queue is flushed. Senders merely *request* a flush; the
//! flush itself happens in the next service pass, unless the queue fills up
//! first, in which case it is drained on the spot.

mod network;
mod stream;

use std::net::SocketAddr;

use log::{error, warn};

use crate::error::{Error, Result};
use crate::ring_buffer::{ring_buffer, Consumer, Producer};

pub use stream::{open_serial, ByteStream};

pub(crate) use network::NetworkBackend;
pub(crate) use stream::{is_transient, StreamBackend};

/// Size of the chunks copied out of the transmit buffer on each backend write.
const TX_CHUNK: usize = 512;

// =============================================================================
// Public Interface
// =============================================================================

/// The kind of backend a [`Transport`] is currently bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Inactive,
    Stream,
    Network,
}

/// Changes of the remote peer, reported by network backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A debugger connected, replacing any previous one.
    Connected(SocketAddr),
    /// The debugger hung up or its connection broke.
    Disconnected,
}

/// Transmit buffering and raw byte I/O for one transport session.
pub struct Transport {
    backend: Backend,
    tx_in: Producer,
    tx_out: Consumer,
    flush_requested: bool,
    ack_requested: bool,
    /// A backend failure hit while draining a full queue from inside
    /// [`write`](Self::write), reported by the next flush.
    fault: Option<Error>,
}
impl Transport {
    /// Create an inactive transport with a transmit buffer of `tx_capacity`
    /// slots.
    pub fn new(tx_capacity: usize) -> Self {
        let (tx_in, tx_out) = ring_buffer(tx_capacity);
        Transport {
            backend: Backend::Inactive,
            tx_in,
            tx_out,
            flush_requested: false,
            ack_requested: false,
            fault: None,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.backend {
            Backend::Inactive => Mode::Inactive,
            Backend::Stream(_) => Mode::Stream,
            Backend::Network(_) => Mode::Network,
        }
    }

    /// Local TCP port of a network session.
    pub fn local_port(&self) -> Option<u16> {
        match &self.backend {
            Backend::Network(net) => net.local_port(),
            _ => None,
        }
    }

    /// Queue `bytes` for transmission and return how many were accepted. When
    /// the queue fills up it is drained to the backend immediately; whatever
    /// still does not fit afterwards is rejected.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = self.tx_in.write(bytes);
        if accepted < bytes.len() || self.tx_in.is_full() {
            if let Err(e) = self.drain() {
                error!("transmit failed: {}", e);
                self.fault = Some(e);
            }
            accepted += self.tx_in.write(&bytes[accepted..]);
        }
        if accepted < bytes.len() {
            warn!("tx buffer overflow, {} bytes dropped", bytes.len() - accepted);
        }
        accepted
    }

    /// Ask for the queued bytes to be sent during the next service pass.
    pub fn request_flush(&mut self) {
        self.flush_requested = true;
    }

    /// `true` if a flush was requested and has not completed yet.
    pub fn flush_pending(&self) -> bool {
        self.flush_requested
    }

    /// Number of bytes waiting in the transmit buffer.
    pub fn pending(&self) -> usize {
        self.tx_out.len()
    }

    /// Hand the queued bytes to the backend. Stops early, keeping the flush
    /// request alive, when the backend has no more room for now.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(e) = self.fault.take() {
            return Err(e);
        }
        self.drain()?;
        if self.tx_out.is_empty() {
            self.backend.flush()?;
            self.flush_requested = false;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Crate-Public Interface
    // -------------------------------------------------------------------------

    /// Bind to a new backend, dropping whatever was queued for the old one.
    pub(crate) fn attach(&mut self, backend: impl Into<Backend>) {
        self.detach();
        self.backend = backend.into();
    }

    /// Return to the inactive backend with empty buffers.
    pub(crate) fn detach(&mut self) {
        self.backend.close();
        self.backend = Backend::Inactive;
        self.reset();
    }

    /// Accept new peers and notice departed ones. Buffers are reset on every
    /// change of peer.
    pub(crate) fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = match &mut self.backend {
            Backend::Network(net) => net.poll_event(),
            _ => None,
        };
        if event.is_some() {
            self.reset();
        }
        event
    }

    /// Read inbound bytes without blocking.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.backend.read(buf)
    }

    pub(crate) fn request_ack(&mut self) {
        self.ack_requested = true;
    }

    /// `true` if a packet was sent since the last call.
    pub(crate) fn take_ack_request(&mut self) -> bool {
        std::mem::replace(&mut self.ack_requested, false)
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    fn drain(&mut self) -> Result<()> {
        let mut chunk = [0u8; TX_CHUNK];
        loop {
            let n = self.tx_out.peek(&mut chunk);
            if n == 0 {
                return Ok(());
            }
            let sent = self.backend.write(&chunk[..n])?;
            self.tx_out.advance(sent);
            if sent == 0 {
                return Ok(());
            }
        }
    }

    fn reset(&mut self) {
        self.tx_out.clear();
        self.flush_requested = false;
        self.ack_requested = false;
        self.fault = None;
    }
}
impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("mode", &self.mode())
            .field("pending", &self.pending())
            .field("flush_requested", &self.flush_requested)
            .finish()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The closed set of backends a transport can be bound to.
pub(crate) enum Backend {
    Inactive,
    Stream(StreamBackend),
    Network(NetworkBackend),
}
impl Backend {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Backend::Inactive => Ok(0),
            Backend::Stream(stream) => stream.read(buf),
            Backend::Network(net) => Ok(net.read(buf)),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match self {
            Backend::Inactive => Ok(bytes.len()),
            Backend::Stream(stream) => stream.write(bytes),
            Backend::Network(net) => Ok(net.write(bytes)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Backend::Inactive => Ok(()),
            Backend::Stream(stream) => stream.flush(),
            Backend::Network(net) => {
                net.flush();
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        if let Backend::Network(net) = self {
            net.close();
        }
    }
}
impl From<StreamBackend> for Backend {
    fn from(stream: StreamBackend) -> Backend {
        Backend::Stream(stream)
    }
}
impl From<NetworkBackend> for Backend {
    fn from(net: NetworkBackend) -> Backend {
        Backend::Network(net)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
