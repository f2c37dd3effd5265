//! Drives a probe over a real loopback TCP connection.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use gdbcom::{
    CommandError, CommandInterpreter, MemoryError, Mode, Probe, SettingsBuilder, TargetMemory,
    Transport,
};

/// Answers `ping` with `pong` and records everything else.
#[derive(Default)]
struct Pong {
    packets: Vec<Vec<u8>>,
    halts: usize,
}

impl CommandInterpreter for Pong {
    fn handle_packet(
        &mut self,
        packet: &[u8],
        transport: &mut Transport,
    ) -> Result<(), CommandError> {
        self.packets.push(packet.to_vec());
        if packet == b"ping" {
            transport.send_packet(b"pong");
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.halts += 1;
    }
}

impl TargetMemory for Pong {
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        Err(MemoryError {
            addr,
            len: buf.len(),
        })
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        Err(MemoryError {
            addr,
            len: data.len(),
        })
    }
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn listening_probe() -> (Probe, u16) {
    let mut probe = Probe::new(SettingsBuilder::new().finalize());
    let port = free_port();
    probe.init_tcp(u32::from(port)).unwrap();
    assert_eq!(probe.mode(), Mode::Network);
    assert_eq!(probe.local_port(), Some(port));
    (probe, port)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    stream
}

/// Service `probe` until `client` has received `expected`, or give up.
fn exchange(
    probe: &mut Probe,
    target: &mut Pong,
    client: &mut TcpStream,
    expected: &[u8],
) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.len() < expected.len() && Instant::now() < deadline {
        probe
            .service(target, &mut |text: &[u8]| print!("{}", String::from_utf8_lossy(text)))
            .unwrap();
        if let Ok(n) = client.read(&mut buf) {
            received.extend_from_slice(&buf[..n]);
        }
        thread::sleep(Duration::from_millis(1));
    }
    received
}

#[test]
fn ping_over_tcp() {
    let (mut probe, port) = listening_probe();
    let mut target = Pong::default();
    let mut client = connect(port);

    client.write_all(b"$ping#ae").unwrap();
    let received = exchange(&mut probe, &mut target, &mut client, b"+$pong#b4");
    assert_eq!(received, b"+$pong#b4");
    assert_eq!(target.packets, vec![b"ping".to_vec()]);
}

#[test]
fn bad_checksum_over_tcp() {
    let (mut probe, port) = listening_probe();
    let mut target = Pong::default();
    let mut client = connect(port);

    client.write_all(b"$ping#00").unwrap();
    let received = exchange(&mut probe, &mut target, &mut client, b"-");
    assert_eq!(received, b"-");
    assert!(target.packets.is_empty());
}

#[test]
fn new_connection_replaces_the_old_one() {
    let (mut probe, port) = listening_probe();
    let mut target = Pong::default();

    let mut first = connect(port);
    first.write_all(b"\x03").unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while target.halts == 0 && Instant::now() < deadline {
        probe.service(&mut target, &mut |_: &[u8]| {}).unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(target.halts, 1);

    let mut second = connect(port);
    second.write_all(b"$ping#ae").unwrap();
    let received = exchange(&mut probe, &mut target, &mut second, b"+$pong#b4");
    assert_eq!(received, b"+$pong#b4");

    // The first connection was shut down by the probe.
    let mut buf = [0u8; 16];
    first
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    assert!(matches!(first.read(&mut buf), Ok(0) | Err(_)));
}

#[test]
fn listener_survives_a_disconnect() {
    let (mut probe, port) = listening_probe();
    let mut target = Pong::default();

    {
        let mut client = connect(port);
        client.write_all(b"$pi").unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            probe.service(&mut target, &mut |_: &[u8]| {}).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    }

    // The half packet from the departed peer must not leak into the next one.
    let mut client = connect(port);
    client.write_all(b"ng#ae$ping#ae").unwrap();
    let received = exchange(&mut probe, &mut target, &mut client, b"+$pong#b4");
    assert_eq!(received, b"+$pong#b4");
    assert_eq!(target.packets, vec![b"ping".to_vec()]);
    assert_eq!(probe.mode(), Mode::Network);
}

#[test]
fn deinit_stops_listening() {
    let (mut probe, port) = listening_probe();
    probe.deinit();
    assert_eq!(probe.mode(), Mode::Inactive);
    assert!(TcpStream::connect_timeout(
        &([127, 0, 0, 1], port).into(),
        Duration::from_millis(200)
    )
    .is_err());
}
