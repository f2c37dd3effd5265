//! Generic byte stream backend, and the serial port helpers producing one.

use std::io::{self, Read, Write};

use log::{debug, info, trace, warn};
use serialport::SerialPort;

use crate::error::{Error, Result};
use crate::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// A bidirectional byte stream that can tell how much can be read without
/// blocking.
///
/// Implemented for serial ports. Writes are expected to give up quickly (e.g.
/// through a short timeout) when the stream has no room; such writes are
/// reported as having accepted nothing.
pub trait ByteStream: Read + Write + Send {
    /// Number of bytes that can be read right now.
    fn bytes_to_read(&mut self) -> io::Result<usize>;
}

impl ByteStream for Box<dyn SerialPort> {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        SerialPort::bytes_to_read(&**self)
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }
}

/// Open the serial port at `path` at `baud_rate` and configure it with the
/// line settings in `settings`, retrying for a few seconds while the device is
/// not ready.
pub fn open_serial(path: &str, baud_rate: u32, settings: &Settings) -> Result<Box<dyn SerialPort>> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {} ({})", path, index);
            serialport::new(path, baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(settings.timeout)
                .open()
        },
    );
    match result {
        Ok(port) => {
            info!("Connected to {} at {} baud", path, baud_rate);
            if let Ok(actual) = port.baud_rate() {
                if actual != baud_rate {
                    warn!(
                        "{} runs at {} baud instead of the requested {}",
                        path, actual, baud_rate
                    );
                }
            }
            Ok(port)
        }
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open the port after {:?} and {} tries: {}",
                total_delay, tries, error,
            );
            Err(Error::Serial(error))
        }
        Err(retry::Error::Internal(description)) => {
            info!("Internal retry error while opening port: {}", description);
            Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "internal error while retrying to open the port",
            )))
        }
    }
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Backend driving a [`ByteStream`] directly from the service pass.
pub(crate) struct StreamBackend {
    stream: Box<dyn ByteStream>,
}
impl StreamBackend {
    pub(crate) fn new(stream: Box<dyn ByteStream>) -> Self {
        StreamBackend { stream }
    }

    /// Read what is available, never more, so the call cannot block.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.stream.bytes_to_read()?;
        if available == 0 {
            return Ok(0);
        }
        trace!("Bytes available to read: {}", available);
        let len = available.min(buf.len());
        match self.stream.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(ref e) if is_transient(e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        match self.stream.write(bytes) {
            Ok(n) => {
                trace!("{} bytes written to stream", n);
                Ok(n)
            }
            Err(ref e) if is_transient(e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        match self.stream.flush() {
            Err(ref e) if is_transient(e) => Ok(()),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(()),
        }
    }
}

/// The stream has no room or no data right now; try again next pass.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
