//! `gdbcom` is the communication core of a GDB debug probe. It speaks the GDB
//! Remote Serial Protocol (RSP) to a debugger over a serial port or a TCP
//! socket, and streams telemetry from the target while doing so.
//!
//! The crate only moves and validates bytes. What a packet means is decided by
//! a [`CommandInterpreter`] supplied by the embedding program, which also
//! provides access to target memory through [`TargetMemory`] and decides where
//! human readable output goes with a [`DisplaySink`].
//!
//! Everything is organized around a [`Probe`] session object, serviced by a
//! cooperative loop:
//!
//! * The [`Transport`] owns the transmit ring buffer and exactly one backend:
//!   inactive, a byte stream (serial port) or a TCP listener. Backends are a
//!   closed set, selected when the session is initialized.
//! * The [receive state machine](rsp::Receiver) consumes inbound bytes one at
//!   a time, acknowledges valid packets and dispatches them.
//! * The [encoder](rsp::encoder) frames, escapes and checksums outgoing
//!   packets.
//! * The [trace decoders](trace) forward SWO instrumentation trace and the
//!   contents of a ring buffer in target memory to the display sink.
//!
//! Each call to [`Probe::service`] runs one pass of all of the above and never
//! blocks. The only concurrency boundary is the TCP backend, whose reader
//! thread hands inbound bytes to the service pass through a lock-free
//! single-producer/single-consumer [ring buffer](ring_buffer).
//!
//! Errors are split by who has to deal with them:
//!
//! * framing errors (bad checksum, overflow) are answered on the wire with a
//!   negative acknowledgement and never surface;
//! * transport errors end the session and are returned as [`Error`];
//! * command faults are returned by the interpreter as [`CommandError`] and
//!   turned into `Exx` replies;
//! * target memory faults only disable the trace source that hit them.

mod error;
mod probe;
pub mod ring_buffer;
pub mod rsp;
mod settings;
mod target;
pub mod trace;
mod transport;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
pub use probe::Probe;
pub use settings::{Settings, SettingsBuilder, DEFAULT_MAX_PACKET_SIZE};
pub use target::{
    CommandError, CommandInterpreter, ConsoleSink, DisplaySink, MemoryError, TargetMemory,
};
pub use trace::TraceBufDescriptor;
pub use transport::{open_serial, ByteStream, Mode, Transport, TransportEvent};
