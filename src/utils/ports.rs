//! Serial port enumeration and interactive selection.

use std::{thread, time::Duration};

use console::{style, Term};
use log::info;
use serialport::{available_ports, SerialPortInfo, SerialPortType};

//==============================================================================
// Public Interface
//==============================================================================

/// Present the connected serial ports to the user and return the path of the
/// one selected. Waits for a device to show up when there is none, and
/// enumerates again when the user cancels the selection.
///
/// Returns `None` if the terminal is not interactive.
pub fn select_port() -> Option<String> {
    let term = Term::stderr();
    loop {
        let mut waited = 0;
        let ports = loop {
            let ports = describe_ports();
            if !ports.is_empty() {
                break ports;
            }
            let _ = term.clear_last_lines(usize::from(waited > 0));
            let _ = term.write_line(&format!(
                "[{:03}s] Waiting for a serial port to be connected...",
                style(waited).dim()
            ));
            thread::sleep(Duration::from_secs(1));
            waited += 1;
        };

        match select_interactive(&ports) {
            Ok(Some(path)) => {
                let _ = term.write_line(&format!("Serial port {} selected", style(&path).green()));
                return Some(path);
            }
            Ok(None) => {
                let _ = term.write_line("Selection canceled -> refreshing...");
            }
            Err(e) => {
                info!("port selection unavailable: {}", e);
                return None;
            }
        }
    }
}

/// One line per serial port: the path, followed by manufacturer and product for
/// USB devices.
pub fn describe_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports.iter().map(describe).collect(),
        Err(ref e) => {
            info!("error: {}", e.to_string());
            vec![]
        }
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn describe(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(info) => format!(
            "{}: ({} / {})",
            port.port_name,
            info.manufacturer.as_ref().map_or("", String::as_str),
            info.product.as_ref().map_or("", String::as_str)
        ),
        _ => port.port_name.clone(),
    }
}

/// The path part of a line produced by [`describe`].
fn port_path(description: &str) -> &str {
    description.split(": (").next().unwrap_or(description)
}

fn select_interactive(ports: &[String]) -> std::io::Result<Option<String>> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    select.with_prompt("Select the port gdb is connected to");
    for item in ports {
        select.item(item);
    }

    let selection = select.default(0).interact_on_opt(&term)?;
    Ok(selection
        .and_then(|index| ports.get(index))
        .map(|description| String::from(port_path(description))))
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn usb_ports_are_described() {
    use serialport::UsbPortInfo;

    let port = SerialPortInfo {
        port_name: "/dev/ttyACM0".into(),
        port_type: SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x1d50,
            pid: 0x6018,
            serial_number: None,
            manufacturer: Some("Black Sphere Technologies".into()),
            product: Some("Black Magic Probe".into()),
        }),
    };
    let line = describe(&port);
    assert_eq!(line, "/dev/ttyACM0: (Black Sphere Technologies / Black Magic Probe)");
    assert_eq!(port_path(&line), "/dev/ttyACM0");
}

#[test]
fn other_ports_are_described_by_path() {
    let port = SerialPortInfo {
        port_name: "/dev/pts/3".into(),
        port_type: SerialPortType::Unknown,
    };
    assert_eq!(describe(&port), "/dev/pts/3");
    assert_eq!(port_path("/dev/pts/3"), "/dev/pts/3");
}

#[test]
fn windows_port_paths() {
    assert_eq!(port_path("COM3: (FTDI / FT232R)"), "COM3");
}
