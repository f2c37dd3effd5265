//! Interfaces to the collaborators of a `gdbcom` session.
//!
//! `gdbcom` only moves bytes. What a validated packet means, how target memory
//! is accessed and where human readable output ends up are decided by the code
//! implementing the traits in this module:
//!
//! * [`CommandInterpreter`] receives every packet that passed framing and
//!   checksum validation, and answers it through the [`Transport`].
//! * [`TargetMemory`] gives the ring-buffer poller access to the debuggee's
//!   memory.
//! * [`DisplaySink`] shows decoded trace output and error reports.

use std::io::{self, Write};

use thiserror::Error;

use crate::transport::Transport;

// =============================================================================
// Command interpreter
// =============================================================================

/// Failure reported by the command interpreter while handling a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command failed but the target is still usable. Answered with an
    /// `E<nn>` packet.
    #[error("command failed with error {0:#04x}")]
    Errno(u8),
    /// The target can no longer be debugged. Answered with `EFF`, after which
    /// the target list is torn down.
    #[error("target lost: {0}")]
    Fatal(String),
}

/// Executes RSP commands on behalf of the connected debugger.
pub trait CommandInterpreter {
    /// Handle one validated packet. `packet` holds the unescaped payload.
    /// Replies are sent through `transport`.
    fn handle_packet(
        &mut self,
        packet: &[u8],
        transport: &mut Transport,
    ) -> Result<(), CommandError>;

    /// The debugger sent the out-of-band interrupt byte (`0x03`).
    fn halt(&mut self);

    /// A [`CommandError::Fatal`] was reported. Drop every attached target.
    fn target_lost(&mut self) {}

    /// Called once per service pass, outside of packet dispatch, so that a
    /// running target can be polled. Packets sent from here are expected to
    /// be acknowledged by the debugger.
    fn poll(&mut self, _transport: &mut Transport) -> Result<(), CommandError> {
        Ok(())
    }
}

// =============================================================================
// Target memory
// =============================================================================

/// Failure of a target memory access.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("memory access of {len} bytes at {addr:#010x} failed")]
pub struct MemoryError {
    pub addr: u32,
    pub len: usize,
}

/// Access to the memory of the debugged target.
pub trait TargetMemory {
    /// Fill `buf` with the bytes at `addr`.
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Store `data` at `addr`.
    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// `false` once the target has been detached or lost.
    fn is_attached(&self) -> bool {
        true
    }
}

// =============================================================================
// Display sink
// =============================================================================

/// Destination of human readable output: decoded trace channels, target log
/// buffers and error reports.
pub trait DisplaySink {
    fn display(&mut self, text: &[u8]);
}

impl<F> DisplaySink for F
where
    F: FnMut(&[u8]),
{
    fn display(&mut self, text: &[u8]) {
        self(text)
    }
}

/// Writes everything to stdout. Used when no other sink is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;
impl DisplaySink for ConsoleSink {
    fn display(&mut self, text: &[u8]) {
        if text.is_empty() {
            return;
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = out.write_all(text).and_then(|_| out.flush()) {
            log::info!("error: {:?}", e.to_string());
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn closures_are_sinks() {
    let mut seen = Vec::new();
    {
        let mut sink = |text: &[u8]| seen.extend_from_slice(text);
        sink.display(b"abc");
        sink.display(b"def");
    }
    assert_eq!(seen, b"abcdef");
}

#[test]
fn error_messages() {
    assert_eq!(
        MemoryError { addr: 0x2000_0000, len: 4 }.to_string(),
        "memory access of 4 bytes at 0x20000000 failed"
    );
    assert_eq!(CommandError::Errno(1).to_string(), "command failed with error 0x01");
    assert_eq!(
        CommandError::Fatal("swd fault".into()).to_string(),
        "target lost: swd fault"
    );
}
