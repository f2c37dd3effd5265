//! Streaming telemetry from the target, independent of the RSP channel.
//!
//! Two sources are supported, each driven once per service pass:
//!
//! * [`TraceSwo`] reads the instrumentation trace sent on the target's SWO pin
//!   from a secondary serial port and forwards the enabled channels.
//! * [`TraceBuf`] polls a ring buffer that lives in the target's own memory.
//!
//! Both write their output, and any report about why they stopped, to a
//! [`DisplaySink`](crate::DisplaySink).

mod swo;
mod tracebuf;

pub use swo::{channel_mask, SwoDecoder, TraceSwo, IDLE_FLUSH, SWO_BUFFER_SIZE};
pub use tracebuf::{TraceBuf, TraceBufDescriptor, TraceBufError};
