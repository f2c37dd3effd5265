//! The probe session and its cooperative service pass.
//!
//! A [`Probe`] owns everything that lives as long as a transport session: the
//! transport with its buffers, the receive state machine and the two trace
//! pollers. The embedding program calls [`Probe::service`] over and over; no
//! call blocks.

use std::convert::TryFrom;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::rsp::{Receiver, RxEvent, RxState, TARGET_LOST_REPLY};
use crate::settings::Settings;
use crate::target::{CommandError, CommandInterpreter, DisplaySink, TargetMemory};
use crate::trace::{TraceBuf, TraceBufDescriptor, TraceBufError, TraceSwo};
use crate::transport::{
    open_serial, ByteStream, Mode, NetworkBackend, StreamBackend, Transport, TransportEvent,
};

/// Bytes moved from the transport to the receive state machine per read.
const RX_CHUNK: usize = 512;

// =============================================================================
// Public Interface
// =============================================================================

/// One debug probe session.
///
/// **Example**
///
/// ```no_run
/// use gdbcom::{ConsoleSink, Probe, SettingsBuilder};
/// # use gdbcom::{CommandError, CommandInterpreter, MemoryError, TargetMemory, Transport};
/// # struct Target;
/// # impl CommandInterpreter for Target {
/// #     fn handle_packet(&mut self, _: &[u8], t: &mut Transport) -> Result<(), CommandError> {
/// #         t.send_packet(b"");
/// #         Ok(())
/// #     }
/// #     fn halt(&mut self) {}
/// # }
/// # impl TargetMemory for Target {
/// #     fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
/// #         Err(MemoryError { addr, len: buf.len() })
/// #     }
/// #     fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
/// #         Err(MemoryError { addr, len: data.len() })
/// #     }
/// # }
///
/// let settings = SettingsBuilder::new().tcp_port(2331).finalize();
/// let mut probe = Probe::open(settings)?;
/// let mut target = Target;
/// loop {
///     probe.service(&mut target, &mut ConsoleSink)?;
///     std::thread::sleep(std::time::Duration::from_millis(1));
/// }
/// # Ok::<(), gdbcom::Error>(())
/// ```
#[derive(Debug)]
pub struct Probe {
    settings: Settings,
    receiver: Receiver,
    transport: Transport,
    swo: TraceSwo,
    tracebuf: TraceBuf,
}
impl Probe {
    /// Create an inactive probe. Nothing is read or written until one of the
    /// `init_*` methods is called.
    pub fn new(settings: Settings) -> Self {
        let mut tracebuf = TraceBuf::new();
        if let Some(descriptor) = settings.tracebuf {
            if let Err(e) = tracebuf.set_descriptor(descriptor) {
                warn!("{}", e);
            }
        }
        Probe {
            receiver: Receiver::new(settings.max_packet_size),
            transport: Transport::new(settings.ring_slots()),
            swo: TraceSwo::new(),
            tracebuf,
            settings,
        }
    }

    /// Create a probe and start the session described by `settings`: a TCP
    /// listener when a port is set, the serial port otherwise. The SWO port is
    /// opened as well when configured.
    pub fn open(settings: Settings) -> Result<Self> {
        let mut probe = Probe::new(settings);
        let tcp_port = probe.settings.tcp_port;
        let path = probe.settings.path.clone();
        match (tcp_port, path) {
            (Some(port), _) => probe.init_tcp(u32::from(port))?,
            (None, Some(path)) => probe.init_serial(&path)?,
            (None, None) => return Err(Error::NoTransport),
        }
        if let Some(swo_path) = probe.settings.swo_path.clone() {
            let channels = probe.settings.swo_channels.clone();
            probe.open_swo(&swo_path, &channels)?;
        }
        Ok(probe)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.transport.mode()
    }

    /// Port the TCP listener is bound to, if any.
    pub fn local_port(&self) -> Option<u16> {
        self.transport.local_port()
    }

    /// State of the receive state machine.
    pub fn receiver_state(&self) -> RxState {
        self.receiver.state()
    }

    /// The transport, for sending packets outside of packet dispatch.
    pub fn transport(&mut self) -> &mut Transport {
        &mut self.transport
    }

    // -------------------------------------------------------------------------
    // Session lifecycle
    // -------------------------------------------------------------------------

    /// Talk RSP over `stream`, replacing the current session.
    pub fn init_stream(&mut self, stream: Box<dyn ByteStream>) {
        self.deinit();
        self.transport.attach(StreamBackend::new(stream));
        info!("gdb session on stream");
    }

    /// Talk RSP over the serial port at `path`, replacing the current session.
    pub fn init_serial(&mut self, path: &str) -> Result<()> {
        let port = open_serial(path, self.settings.baud_rate, &self.settings)?;
        self.init_stream(Box::new(port));
        Ok(())
    }

    /// Listen for GDB on TCP `port`, replacing the current session. The
    /// listener survives peer disconnects.
    pub fn init_tcp(&mut self, port: u32) -> Result<()> {
        let port = match u16::try_from(port) {
            Ok(port) if port > 0 => port,
            _ => return Err(Error::InvalidTcpPort(port)),
        };
        self.deinit();
        // The receive ring is sized like the transmit ring.
        let backend = NetworkBackend::bind(port, self.settings.ring_slots())?;
        self.transport.attach(backend);
        Ok(())
    }

    /// End the current session and return to the inactive state.
    pub fn deinit(&mut self) {
        if self.transport.mode() != Mode::Inactive {
            info!("gdb session closed");
        }
        self.transport.detach();
        self.receiver.reset();
    }

    // -------------------------------------------------------------------------
    // Trace configuration
    // -------------------------------------------------------------------------

    /// Decode SWO from `source`, showing `channels` (all when empty).
    pub fn attach_swo(&mut self, source: Box<dyn ByteStream>, channels: &[u8]) {
        self.swo.attach(source, channels);
    }

    /// Decode SWO from the serial port at `path`.
    pub fn open_swo(&mut self, path: &str, channels: &[u8]) -> Result<()> {
        let port = open_serial(path, self.settings.swo_baud_rate, &self.settings)?;
        self.attach_swo(Box::new(port), channels);
        Ok(())
    }

    pub fn detach_swo(&mut self) {
        self.swo.detach();
    }

    /// Show only `channels` of the SWO stream.
    pub fn set_trace_channels(&mut self, channels: &[u8]) {
        self.swo.set_channels(channels);
    }

    pub fn set_trace_mask(&mut self, mask: u32) {
        self.swo.set_mask(mask);
    }

    pub fn swo_enabled(&self) -> bool {
        self.swo.is_enabled()
    }

    /// Poll the target ring buffer described by `descriptor`.
    pub fn set_tracebuf(&mut self, descriptor: TraceBufDescriptor) -> Result<(), TraceBufError> {
        self.tracebuf.set_descriptor(descriptor)
    }

    pub fn enable_tracebuf(&mut self, enabled: bool) {
        self.tracebuf.set_enabled(enabled);
    }

    pub fn tracebuf_enabled(&self) -> bool {
        self.tracebuf.is_enabled()
    }

    // -------------------------------------------------------------------------
    // Service
    // -------------------------------------------------------------------------

    /// Handle peer changes, then feed every byte received so far to the
    /// receive state machine, in arrival order. Returns the number of bytes
    /// fed.
    pub fn poll_and_dispatch<C, D>(&mut self, interpreter: &mut C, sink: &mut D) -> Result<usize>
    where
        C: CommandInterpreter + ?Sized,
        D: DisplaySink + ?Sized,
    {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected(addr) => debug!("new peer {}", addr),
                TransportEvent::Disconnected => debug!("peer gone"),
            }
            self.receiver.reset();
        }

        let mut chunk = [0u8; RX_CHUNK];
        let mut total = 0;
        loop {
            let n = self.transport.read(&mut chunk)?;
            for &byte in &chunk[..n] {
                if let Some(event) = self.receiver.feed(byte, &mut self.transport, interpreter) {
                    report(event, sink);
                }
            }
            total += n;
            if n < chunk.len() {
                return Ok(total);
            }
        }
    }

    /// Send whatever is queued, if a flush was requested.
    pub fn flush(&mut self) -> Result<()> {
        if self.transport.flush_pending() {
            self.transport.flush()?;
        }
        Ok(())
    }

    /// One pass of the service loop: dispatch received packets, let the
    /// interpreter poll the target, send queued bytes, then poll both trace
    /// sources.
    ///
    /// A transport failure ends the session (the probe goes back to inactive)
    /// and is returned. Trace failures only disable the failing source.
    pub fn service<T, D>(&mut self, target: &mut T, sink: &mut D) -> Result<()>
    where
        T: CommandInterpreter + TargetMemory + ?Sized,
        D: DisplaySink + ?Sized,
    {
        if let Err(e) = self.exchange(target, sink) {
            error!("transport failed: {}", e);
            self.deinit();
            return Err(e);
        }
        self.swo.poll(Instant::now(), sink);
        if let Err(e) = self.tracebuf.poll(target, sink) {
            debug!("tracebuf stopped: {:?}", e);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Private stuff
    // -------------------------------------------------------------------------

    fn exchange<T, D>(&mut self, target: &mut T, sink: &mut D) -> Result<()>
    where
        T: CommandInterpreter + ?Sized,
        D: DisplaySink + ?Sized,
    {
        self.poll_and_dispatch(target, sink)?;
        self.poll_target(target, sink);
        self.flush()
    }

    fn poll_target<T, D>(&mut self, target: &mut T, sink: &mut D)
    where
        T: CommandInterpreter + ?Sized,
        D: DisplaySink + ?Sized,
    {
        match target.poll(&mut self.transport) {
            Ok(()) => {}
            Err(CommandError::Errno(errno)) => warn!("target poll failed: {:#04x}", errno),
            Err(CommandError::Fatal(reason)) => {
                self.transport.send_packet(TARGET_LOST_REPLY);
                target.target_lost();
                report(RxEvent::TargetLost(reason), sink);
            }
        }
        if self.transport.take_ack_request() {
            self.receiver.expect_ack();
        }
    }
}

fn report<D>(event: RxEvent, sink: &mut D)
where
    D: DisplaySink + ?Sized,
{
    match event {
        RxEvent::TargetLost(reason) => {
            error!("target lost: {}", reason);
            sink.display(format!("\r\ntarget lost: {}\r\n", reason).as_bytes());
        }
        RxEvent::CommandFailed(errno) => debug!("command failed: {:#04x}", errno),
        other => debug!("rx: {:?}", other),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
