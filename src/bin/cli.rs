//! gdbcom command line interface.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, values_t, App,
    AppSettings::*, Arg, ArgMatches,
};
use console::style;
use log::{debug, info, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use gdbcom::{
    self as gc, CommandError, CommandInterpreter, ConsoleSink, MemoryError, Probe, TargetMemory,
    Transport,
};

/// Pause between two service passes.
const SERVICE_PERIOD: Duration = Duration::from_millis(1);

/// Stands in for a target when none is attached: every command is answered
/// as unsupported and memory is unreachable.
struct NoTarget;

impl CommandInterpreter for NoTarget {
    fn handle_packet(
        &mut self,
        packet: &[u8],
        transport: &mut Transport,
    ) -> Result<(), CommandError> {
        debug!("unsupported: {}", String::from_utf8_lossy(packet));
        transport.send_packet(b"");
        Ok(())
    }

    fn halt(&mut self) {
        info!("halt requested, no target attached");
    }
}

impl TargetMemory for NoTarget {
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

    fn is_attached(&self) -> bool {
        false
    }
}

fn main() {
    println!("[GC] gdbcom v{}", crate_version!());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            println!("🛑 received Ctrl+C!");
            running.store(false, Ordering::SeqCst);
        })
        .expect("Failed to install my Ctrl-C handler!");
    }

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            gdbcom serves the GDB remote serial protocol of a debug probe, \
            either on a serial port or on a TCP port gdb can connect to with \
            `target extended-remote :<port>`.\n\
            \n\
            Packets are validated, acknowledged and handed to the command \
            interpreter. Without a target, every command is answered as \
            unsupported.\n\
            \n\
            When an SWO serial port is given, the instrumentation trace of the \
            selected channels is printed to stdout.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the tty device gdb talks to")
                .long_help(
                    "the tty device gdb talks to; when neither this nor \
                     `--tcp` is given, the device is selected interactively.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true)
                .conflicts_with("TCP_PORT"),
        )
        .arg(
            Arg::with_name("TCP_PORT")
                .help("listen for gdb on this tcp port")
                .long("--tcp")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SWO_TTY")
                .help("serial port connected to the target's SWO pin")
                .long("--swo")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SWO_BAUD_RATE")
                .help("baud rate of the SWO serial port")
                .long("--swo-baud")
                .takes_value(true)
                .default_value("2250000")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SWO_CHANNEL")
                .help("SWO channel to print; repeat for more, all when absent")
                .long("--chan")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'gdbcom -v -v -v' or 'gdbcom -vvv' vs 'gdbcom -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    let settings = settings_from(&matches);
    debug!("{:#?}", settings);

    let mut probe = Probe::open(settings).unwrap_or_else(|e| fail(&e));
    if let Some(port) = probe.local_port() {
        println!("[GC] waiting for gdb on tcp port {}", style(port).cyan());
    }

    let mut target = NoTarget;
    let mut sink = ConsoleSink;
    while running.load(Ordering::SeqCst) {
        if let Err(e) = probe.service(&mut target, &mut sink) {
            fail(&e);
        }
        thread::sleep(SERVICE_PERIOD);
    }
    probe.deinit();
}

fn settings_from(matches: &ArgMatches) -> gc::Settings {
    // Arguments with default values ===========================================

    let baud_rate = numeric(matches, "BAUD_RATE", "baud-rate");
    let swo_baud_rate = numeric(matches, "SWO_BAUD_RATE", "swo-baud");

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    let mut builder = gc::SettingsBuilder::new()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .swo_baud_rate(swo_baud_rate);

    // Arguments with NO default values ========================================

    if let Some(port) = matches.value_of("TCP_PORT") {
        match port.parse::<u32>() {
            Ok(port) if (1..=65535).contains(&port) => builder = builder.tcp_port(port as u16),
            _ => fail(&gc::Error::InvalidTcpPort(port.parse().unwrap_or(0))),
        }
    } else if let Some(path) = matches.value_of("DEVICE_TTY") {
        builder = builder.path(path);
    } else {
        match gc::utils::select_port() {
            Some(path) => builder = builder.path(path),
            None => fail(&gc::Error::NoTransport),
        }
    }

    if let Some(path) = matches.value_of("SWO_TTY") {
        builder = builder.swo_path(path);
    }
    if matches.is_present("SWO_CHANNEL") {
        let channels = values_t!(matches.values_of("SWO_CHANNEL"), u8).unwrap_or_else(|e| {
            println!("{}: invalid swo channel: {}", style("error").red(), e);
            process::exit(-1);
        });
        builder = builder.swo_channels(&channels);
    }

    builder.finalize()
}

/// Value of a numeric argument, or exit with a diagnostic.
fn numeric(matches: &ArgMatches, name: &str, flag: &str) -> u32 {
    value_t!(matches.value_of(name), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(flag).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap_or_default()).on_red()
        );
        process::exit(-1);
    })
}

fn fail(e: &gc::Error) -> ! {
    println!("{}: {}", style("error").red(), e);
    process::exit(1);
}
