//! Stand-ins for the serial port and the target, shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::target::{CommandError, CommandInterpreter, MemoryError, TargetMemory};
use crate::transport::{ByteStream, Transport};

// =============================================================================
// Byte stream
// =============================================================================

#[derive(Debug)]
struct Wire {
    inbound: VecDeque<u8>,
    sent: Vec<u8>,
    write_limit: usize,
    broken: bool,
}

/// In-memory [`ByteStream`]. Clones share the same wire, so a test can keep
/// one handle while the transport owns another.
#[derive(Debug, Clone)]
pub(crate) struct MockStream {
    wire: Arc<Mutex<Wire>>,
}
impl MockStream {
    pub(crate) fn new() -> Self {
        MockStream {
            wire: Arc::new(Mutex::new(Wire {
                inbound: VecDeque::new(),
                sent: Vec::new(),
                write_limit: usize::MAX,
                broken: false,
            })),
        }
    }

    /// Accept at most `limit` bytes per write.
    pub(crate) fn with_write_limit(self, limit: usize) -> Self {
        self.set_write_limit(limit);
        self
    }

    pub(crate) fn set_write_limit(&self, limit: usize) {
        self.lock().write_limit = limit;
    }

    /// Make bytes available for reading.
    pub(crate) fn feed(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub(crate) fn sent(&self) -> Vec<u8> {
        self.lock().sent.clone()
    }

    /// Fail every following operation, as an unplugged device would.
    pub(crate) fn break_link(&self) {
        self.lock().broken = true;
    }

    fn lock(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap()
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.lock();
        if wire.broken {
            return Err(broken_pipe());
        }
        let n = buf.len().min(wire.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.lock();
        if wire.broken {
            return Err(broken_pipe());
        }
        let n = buf.len().min(wire.write_limit);
        wire.sent.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.lock().broken {
            return Err(broken_pipe());
        }
        Ok(())
    }
}
impl ByteStream for MockStream {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let wire = self.lock();
        if wire.broken {
            return Err(broken_pipe());
        }
        Ok(wire.inbound.len())
    }
}

// =============================================================================
// Target memory
// =============================================================================

/// A window of target memory starting at `base`.
#[derive(Debug, Clone)]
pub(crate) struct FakeMemory {
    base: u32,
    bytes: Vec<u8>,
    pub(crate) read_only: bool,
    pub(crate) attached: bool,
}
impl FakeMemory {
    pub(crate) fn new(base: u32, len: usize) -> Self {
        FakeMemory {
            base,
            bytes: vec![0; len],
            read_only: false,
            attached: true,
        }
    }

    pub(crate) fn store(&mut self, addr: u32, data: &[u8]) {
        let start = (addr - self.base) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub(crate) fn load_u32(&self, addr: u32) -> u32 {
        let start = (addr - self.base) as usize;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[start..start + 4]);
        u32::from_le_bytes(raw)
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let fail = MemoryError { addr, len };
        let start = addr.checked_sub(self.base).ok_or(fail)? as usize;
        let end = start.checked_add(len).ok_or(fail)?;
        if end > self.bytes.len() {
            return Err(fail);
        }
        Ok(start..end)
    }
}
impl Default for FakeMemory {
    fn default() -> Self {
        FakeMemory::new(0x2000_0000, 0x400)
    }
}
impl TargetMemory for FakeMemory {
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, data.len())?;
        if self.read_only {
            return Err(MemoryError {
                addr,
                len: data.len(),
            });
        }
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached
    }
}

// =============================================================================
// Command interpreter
// =============================================================================

/// Records what the receive machine dispatches and answers as configured.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) packets: Vec<Vec<u8>>,
    pub(crate) halts: usize,
    pub(crate) targets_lost: usize,
    /// Bytes waiting in the transmit buffer when each packet was dispatched.
    pub(crate) pending_at_dispatch: Vec<usize>,
    /// Payload sent back for every packet.
    pub(crate) reply: Option<Vec<u8>>,
    /// Error returned for every packet.
    pub(crate) fail_with: Option<CommandError>,
    /// Payload sent once from the next poll.
    pub(crate) poll_reply: Option<Vec<u8>>,
    /// Error returned once from the next poll.
    pub(crate) poll_fail: Option<CommandError>,
    pub(crate) memory: FakeMemory,
}
impl CommandInterpreter for Recorder {
    fn handle_packet(
        &mut self,
        packet: &[u8],
        transport: &mut Transport,
    ) -> Result<(), CommandError> {
        self.pending_at_dispatch.push(transport.pending());
        self.packets.push(packet.to_vec());
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        if let Some(reply) = &self.reply {
            transport.send_packet(reply);
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.halts += 1;
    }

    fn target_lost(&mut self) {
        self.targets_lost += 1;
        self.memory.attached = false;
    }

    fn poll(&mut self, transport: &mut Transport) -> Result<(), CommandError> {
        if let Some(e) = self.poll_fail.take() {
            return Err(e);
        }
        if let Some(reply) = self.poll_reply.take() {
            transport.send_packet(&reply);
        }
        Ok(())
    }
}
impl TargetMemory for Recorder {
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.memory.read_memory(addr, buf)
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.memory.write_memory(addr, data)
    }

    fn is_attached(&self) -> bool {
        self.memory.is_attached()
    }
}
