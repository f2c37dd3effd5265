//! Polling of a log ring buffer kept in target memory.
//!
//! The target owns a byte buffer plus two 32-bit little endian indices: it
//! advances `head` as it writes, and the probe advances `tail` as it reads.
//! Each poll copies `[tail, head)` out of target memory (in two pieces when the
//! range wraps), hands it to the display sink and stores `head` as the new
//! `tail`.


use log::{debug, info, warn};
use thiserror::Error;

use crate::target::{DisplaySink, TargetMemory};

/// Location of a ring buffer in target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceBufDescriptor {
    /// Address of the first byte of the buffer.
    pub buf_addr: u32,
    /// Buffer length in bytes. Must not be zero.
    pub buf_size: u32,
    /// Address of the target's write index.
    pub head_addr: u32,
    /// Address of the probe's read index.
    pub tail_addr: u32,
}

/// Why polling stopped. The `Display` text is what gets shown to the user.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceBufError {
    #[error("tracebuf: lost")]
    Lost,
    #[error("tracebuf: zero size buffer")]
    ZeroSize,
    #[error("tracebuf: head read fail")]
    HeadRead,
    #[error("tracebuf: tail read fail")]
    TailRead,
    #[error("tracebuf: head out of range error")]
    HeadOutOfRange,
    #[error("tracebuf: tail out of range error")]
    TailOutOfRange,
    #[error("tracebuf: read fail")]
    Read,
    #[error("tracebuf: tail write fail")]
    TailWrite,
}

/// Ring-buffer poller. Any failure clears the descriptor; polling resumes only
/// once a new one is set.
#[derive(Debug, Default)]
pub struct TraceBuf {
    descriptor: Option<TraceBufDescriptor>,
    enabled: bool,
}
impl TraceBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll the buffer described by `descriptor`, enabling polling.
    pub fn set_descriptor(&mut self, descriptor: TraceBufDescriptor) -> Result<(), TraceBufError> {
        if descriptor.buf_size == 0 {
            return Err(TraceBufError::ZeroSize);
        }
        info!(
            "tracebuf at {:#010x}, {} bytes, head at {:#010x}, tail at {:#010x}",
            descriptor.buf_addr, descriptor.buf_size, descriptor.head_addr, descriptor.tail_addr
        );
        self.descriptor = Some(descriptor);
        self.enabled = true;
        Ok(())
    }

    pub fn descriptor(&self) -> Option<TraceBufDescriptor> {
        self.descriptor
    }

    /// Pause or resume polling without forgetting the descriptor.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.descriptor.is_some()
    }

    /// Copy new bytes from the target to `sink` and return how many there
    /// were. On failure the descriptor is dropped and the reason reported on
    /// `sink` as well as returned.
    pub fn poll<M, D>(&mut self, mem: &mut M, sink: &mut D) -> Result<usize, TraceBufError>
    where
        M: TargetMemory + ?Sized,
        D: DisplaySink + ?Sized,
    {
        let descriptor = match self.descriptor {
            Some(descriptor) => descriptor,
            None => return Ok(0),
        };
        if !mem.is_attached() {
            self.descriptor = None;
            return Err(self.report(TraceBufError::Lost, sink));
        }
        if !self.enabled {
            return Ok(0);
        }
        match transfer(&descriptor, mem, sink) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.descriptor = None;
                self.enabled = false;
                Err(self.report(e, sink))
            }
        }
    }

    fn report<D>(&self, error: TraceBufError, sink: &mut D) -> TraceBufError
    where
        D: DisplaySink + ?Sized,
    {
        warn!("{}", error);
        sink.display(format!("\r\n{}\r\n", error).as_bytes());
        error
    }
}

fn read_index<M>(mem: &mut M, addr: u32) -> Option<u32>
where
    M: TargetMemory + ?Sized,
{
    let mut raw = [0u8; 4];
    mem.read_memory(addr, &mut raw).ok()?;
    Some(u32::from_le_bytes(raw))
}

/// Largest read issued to the target at once.
const CHUNK: usize = 256;

/// Show the target bytes at offsets `[start, end)` of the buffer at `base`,
/// one bounded chunk at a time.
fn copy_range<M, D>(
    mem: &mut M,
    sink: &mut D,
    base: u32,
    start: u32,
    end: u32,
) -> Result<usize, TraceBufError>
where
    M: TargetMemory + ?Sized,
    D: DisplaySink + ?Sized,
{
    let mut chunk = [0u8; CHUNK];
    let mut offset = start;
    while offset < end {
        let n = ((end - offset) as usize).min(CHUNK);
        mem.read_memory(base.wrapping_add(offset), &mut chunk[..n])
            .map_err(|_| TraceBufError::Read)?;
        sink.display(&chunk[..n]);
        offset += n as u32;
    }
    Ok((end - start) as usize)
}

fn transfer<M, D>(
    d: &TraceBufDescriptor,
    mem: &mut M,
    sink: &mut D,
) -> Result<usize, TraceBufError>
where
    M: TargetMemory + ?Sized,
    D: DisplaySink + ?Sized,
{
    let head = read_index(mem, d.head_addr).ok_or(TraceBufError::HeadRead)?;
    let tail = read_index(mem, d.tail_addr).ok_or(TraceBufError::TailRead)?;
    if head >= d.buf_size {
        return Err(TraceBufError::HeadOutOfRange);
    }
    if tail >= d.buf_size {
        return Err(TraceBufError::TailOutOfRange);
    }
    if head == tail {
        return Ok(0);
    }

    // Oldest bytes first: [tail, size) then [0, head) when the writer wrapped.
    let len = if head > tail {
        copy_range(mem, sink, d.buf_addr, tail, head)?
    } else {
        let first = copy_range(mem, sink, d.buf_addr, tail, d.buf_size)?;
        first + copy_range(mem, sink, d.buf_addr, 0, head)?
    };
    debug!("tracebuf: {} bytes, tail {} -> {}", len, tail, head);

    mem.write_memory(d.tail_addr, &head.to_le_bytes())
        .map_err(|_| TraceBufError::TailWrite)?;
    Ok(len)
}

// =============================================================================
// Unit Tests
// =============================================================================
