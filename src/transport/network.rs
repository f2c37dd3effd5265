//! TCP backend serving a single debugger connection at a time.
//!
//! Inbound bytes are not read by the service pass. Each accepted connection
//! gets a reader thread that deposits what arrives into a fresh receive ring
//! buffer (the only producer), and the service pass drains it (the only
//! consumer). That way the protocol state machine is only ever driven from the
//! cooperative loop, while the socket is serviced at its own pace.
//!
//! Accepting a new connection unconditionally drops the previous one.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};

use super::stream::is_transient;
use super::TransportEvent;
use crate::error::Result;
use crate::ring_buffer::{ring_buffer, Consumer, Producer};

/// How long the reader thread sleeps when the socket has nothing to read.
const READ_IDLE: Duration = Duration::from_millis(1);

// =============================================================================
// Crate-Public Interface
// =============================================================================

pub(crate) struct NetworkBackend {
    listener: Option<TcpListener>,
    peer: Option<Peer>,
    rx_capacity: usize,
}
impl NetworkBackend {
    /// Listen on `port` on all interfaces.
    pub(crate) fn bind(port: u16, rx_capacity: usize) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        info!("Waiting for gdb on tcp port {}", port);
        Ok(NetworkBackend {
            listener: Some(listener),
            peer: None,
            rx_capacity,
        })
    }

    pub(crate) fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// Report a departed peer first, then a newly accepted one.
    pub(crate) fn poll_event(&mut self) -> Option<TransportEvent> {
        if self.peer.as_ref().map_or(false, Peer::is_gone) {
            if let Some(peer) = self.peer.take() {
                info!("gdb at {} disconnected", peer.addr);
                peer.close();
            }
            return Some(TransportEvent::Disconnected);
        }

        let accepted = match self.listener.as_ref()?.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                warn!("accept failed: {}", e);
                return None;
            }
        };
        let (stream, addr) = accepted;
        match Peer::spawn(stream, addr, self.rx_capacity) {
            Ok(peer) => {
                if let Some(old) = self.peer.replace(peer) {
                    info!("gdb at {} replaced by {}", old.addr, addr);
                    old.close();
                } else {
                    info!("gdb connected from {}", addr);
                }
                Some(TransportEvent::Connected(addr))
            }
            Err(e) => {
                warn!("could not set up connection from {}: {}", addr, e);
                None
            }
        }
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> usize {
        match &mut self.peer {
            Some(peer) => peer.inbound.read(buf),
            None => 0,
        }
    }

    /// Without a peer, bytes are discarded. A broken connection accepts
    /// nothing and is reported as disconnected on the next poll.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> usize {
        let peer = match &mut self.peer {
            Some(peer) => peer,
            None => return bytes.len(),
        };
        if peer.is_gone() {
            return 0;
        }
        match peer.stream.write(bytes) {
            Ok(n) => {
                trace!("{} bytes written to {}", n, peer.addr);
                n
            }
            Err(ref e) if is_transient(e) => 0,
            Err(e) => {
                warn!("write to {} failed: {}", peer.addr, e);
                peer.eof.store(true, Ordering::Release);
                0
            }
        }
    }

    pub(crate) fn flush(&mut self) {
        if let Some(peer) = &mut self.peer {
            if let Err(e) = peer.stream.flush() {
                debug!("flush to {} failed: {}", peer.addr, e);
            }
        }
    }

    /// Drop the peer and stop listening.
    pub(crate) fn close(&mut self) {
        if let Some(peer) = self.peer.take() {
            info!("closing connection to {}", peer.addr);
            peer.close();
        }
        self.listener = None;
    }
}
impl Drop for NetworkBackend {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Private stuff
// =============================================================================

struct Peer {
    addr: SocketAddr,
    stream: TcpStream,
    inbound: Consumer,
    /// Set by the service pass to stop the reader thread.
    closed: Arc<AtomicBool>,
    /// Set when the connection is found dead, by either side.
    eof: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}
impl Peer {
    fn spawn(stream: TcpStream, addr: SocketAddr, rx_capacity: usize) -> io::Result<Self> {
        // A full socket buffer must not stall the service pass: writes accept
        // what fits and the rest stays queued. The mode is shared with the
        // reader's clone.
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        let (producer, inbound) = ring_buffer(rx_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let eof = Arc::new(AtomicBool::new(false));

        let reader = {
            let stream = stream.try_clone()?;
            let closed = Arc::clone(&closed);
            let eof = Arc::clone(&eof);
            thread::Builder::new()
                .name(format!("gdb-rx {}", addr))
                .spawn(move || deliver(stream, producer, &closed, &eof))?
        };

        Ok(Peer {
            addr,
            stream,
            inbound,
            closed,
            eof,
            reader: Some(reader),
        })
    }

    fn is_gone(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    fn close(mut self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("reader thread for {} panicked", self.addr);
            }
        }
    }
}

/// Body of the reader thread: move socket bytes into the receive ring buffer
/// until the peer hangs up or the connection is closed locally.
fn deliver(mut stream: TcpStream, mut inbound: Producer, closed: &AtomicBool, eof: &AtomicBool) {
    let mut buf = [0u8; 512];
    while !closed.load(Ordering::Acquire) {
        match stream.read(&mut buf) {
            Ok(0) => {
                eof.store(true, Ordering::Release);
                break;
            }
            Ok(n) => {
                let accepted = inbound.write(&buf[..n]);
                if accepted < n {
                    warn!("gdb rx buffer overflow, {} bytes dropped", n - accepted);
                }
            }
            Err(ref e) if is_transient(e) => thread::sleep(READ_IDLE),
            Err(e) => {
                debug!("read failed: {}", e);
                eof.store(true, Ordering::Release);
                break;
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
