//! Helper functions for programs embedding a probe.

mod ports;

pub use ports::{describe_ports, select_port};
