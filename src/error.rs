//! Errors raised while setting up or servicing a `gdbcom` transport session.
//!
//! Framing errors on the wire (bad checksum, overflow) never surface here: the
//! receive state machine answers them with a negative acknowledgement and
//! carries on. What does surface are the failures that require the session to
//! be torn down or never to be started in the first place.

use std::io;

use thiserror::Error;

/// Result type alias for `gdbcom` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for transport and session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A read or write on the active backend failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// TCP ports are limited to `1..=65535`.
    #[error("invalid tcp port {0}")]
    InvalidTcpPort(u32),

    /// Neither a serial path nor a tcp port was provided.
    #[error("no transport configured, expected a serial path or a tcp port")]
    NoTransport,

    /// The remote end of a stream went away.
    #[error("peer disconnected")]
    Disconnected,
}

impl Error {
    /// `true` for errors that mean the peer is gone and the session must be
    /// reset before any more traffic can flow.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Disconnected => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            Error::Serial(e) => e.kind() == serialport::ErrorKind::NoDevice,
            _ => false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn disconnect_classification() {
    assert!(Error::Disconnected.is_disconnect());
    assert!(Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_disconnect());
    assert!(!Error::from(io::Error::from(io::ErrorKind::TimedOut)).is_disconnect());
    assert!(!Error::InvalidTcpPort(0).is_disconnect());
}

#[test]
fn messages() {
    assert_eq!(Error::InvalidTcpPort(70000).to_string(), "invalid tcp port 70000");
    assert_eq!(Error::Disconnected.to_string(), "peer disconnected");
}
