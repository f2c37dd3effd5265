//! Settings related to the `gdbcom` transports, the trace decoders and the RSP
//! packet buffers.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::trace::TraceBufDescriptor;

/// Default maximum size of a single RSP packet payload.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by a `gdbcom` session and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The serial port carrying GDB traffic, usually the device path. Ignored
    /// when `tcp_port` is set.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,
    /// How long a serial write may wait for room in the driver before it is
    /// reported as accepting nothing.
    pub timeout: Duration,

    /// Listen for GDB on this TCP port instead of using a serial port.
    pub tcp_port: Option<u16>,

    /// Largest packet payload the receive state machine accepts. Longer
    /// packets are answered with a negative acknowledgement.
    pub max_packet_size: usize,
    /// Number of slots in the transmit ring buffer.
    pub tx_buffer_size: usize,

    /// Serial port wired to the target's SWO pin. No SWO decoding when unset.
    pub swo_path: Option<String>,
    /// Baud rate of the SWO serial port.
    pub swo_baud_rate: u32,
    /// Trace channels to display. When empty, all channels are displayed.
    pub swo_channels: Vec<u8>,

    /// Ring buffer in target memory to poll for log output.
    pub tracebuf: Option<TraceBufDescriptor>,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}
impl Settings {
    /// Ring buffer slots to allocate for `tx_buffer_size`. A ring needs two
    /// slots to hold a single byte.
    pub(crate) fn ring_slots(&self) -> usize {
        self.tx_buffer_size.max(2)
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use gdbcom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().tcp_port(2000).finalize();
/// assert_eq!(settings.tcp_port, Some(2000));
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using default values and no transport.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                timeout: Duration::from_millis(10),
                tcp_port: None,
                max_packet_size: DEFAULT_MAX_PACKET_SIZE,
                tx_buffer_size: 2 * DEFAULT_MAX_PACKET_SIZE,
                swo_path: None,
                swo_baud_rate: 2_250_000,
                swo_channels: Vec::new(),
                tracebuf: None,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the serial write timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Serve GDB on a TCP port
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.settings.tcp_port = Some(port);
        self
    }

    /// Set the largest accepted packet payload, at least one byte. The
    /// transmit buffer is resized to twice that value.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        let size = size.max(1);
        self.settings.max_packet_size = size;
        self.settings.tx_buffer_size = size.saturating_mul(2);
        self
    }

    /// Set the path to the SWO serial port
    pub fn swo_path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.swo_path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the SWO baud rate
    pub fn swo_baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.swo_baud_rate = baud_rate;
        self
    }

    /// Set the trace channels to display
    pub fn swo_channels(mut self, channels: &[u8]) -> Self {
        self.settings.swo_channels = channels.to_vec();
        self
    }

    /// Poll a ring buffer in target memory
    pub fn tracebuf(mut self, descriptor: TraceBufDescriptor) -> Self {
        self.settings.tracebuf = Some(descriptor);
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(10),
            tcp_port: None,
            max_packet_size: 1024,
            tx_buffer_size: 2048,
            swo_path: None,
            swo_baud_rate: 2_250_000,
            swo_channels: vec![],
            tracebuf: None,
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyACM0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyACM0");
}

#[test]
fn tcp_port() {
    let settings = SettingsBuilder::new().tcp_port(3333).finalize();
    assert_eq!(settings.tcp_port, Some(3333));
}

#[test]
fn max_packet_size_resizes_tx_buffer() {
    let settings = SettingsBuilder::new().max_packet_size(400).finalize();
    assert_eq!(settings.max_packet_size, 400);
    assert_eq!(settings.tx_buffer_size, 800);
}

#[test]
fn max_packet_size_is_clamped() {
    let settings = SettingsBuilder::new().max_packet_size(0).finalize();
    assert_eq!(settings.max_packet_size, 1);
    assert_eq!(settings.tx_buffer_size, 2);

    let settings = SettingsBuilder::new().max_packet_size(usize::MAX).finalize();
    assert_eq!(settings.tx_buffer_size, usize::MAX);
}

#[test]
fn ring_slots_has_a_floor() {
    let mut settings = SettingsBuilder::new().finalize();
    assert_eq!(settings.ring_slots(), 2048);
    settings.tx_buffer_size = 0;
    assert_eq!(settings.ring_slots(), 2);
}

#[test]
fn swo() {
    let settings = SettingsBuilder::new()
        .swo_path("/dev/ttyUSB1")
        .swo_baud_rate(1_000_000)
        .swo_channels(&[0, 1])
        .finalize();
    assert_eq!(settings.swo_path.unwrap(), "/dev/ttyUSB1");
    assert_eq!(settings.swo_baud_rate, 1_000_000);
    assert_eq!(settings.swo_channels, vec![0, 1]);
}

#[test]
fn tracebuf() {
    let descriptor = TraceBufDescriptor {
        buf_addr: 0x2000_0000,
        buf_size: 256,
        head_addr: 0x2000_0100,
        tail_addr: 0x2000_0104,
    };
    let settings = SettingsBuilder::new().tracebuf(descriptor).finalize();
    assert_eq!(settings.tracebuf, Some(descriptor));
}

#[test]
fn parity() {
    let parity = Parity::Even;
    let settings = SettingsBuilder::new().parity(parity).finalize();
    assert_eq!(settings.parity, parity);
}
