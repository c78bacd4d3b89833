// candrv/src/bin/candrv.rs

//! Simple CLI tool to exercise the CAN interface driver from the Linux
//! command line, similar to 'can-utils'.

use anyhow::{anyhow, Context, Result};
use candrv::{
    config::{DEFAULT_BITRATE, DEFAULT_TX_QUEUE_LEN},
    link::{self, LinkControl, NetlinkLink},
    FrameDescriptor, Session, SessionConfig,
};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use std::{
    process,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::Duration,
};

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

/// Process the link subcommands: up, down, bitrate and details.
fn link_cmd(iface_name: &str, cmd: &str, opts: &ArgMatches) -> Result<()> {
    let ctl = NetlinkLink;
    match cmd {
        "up" => {
            let mut link = ctl.resolve(iface_name)?;
            link::set_admin_up(&ctl, &mut link, true)?;
        }
        "down" => {
            let mut link = ctl.resolve(iface_name)?;
            link::set_admin_down(&ctl, &mut link)?;
        }
        "bitrate" => {
            let bitrate = *opts
                .get_one::<u32>("bitrate")
                .ok_or_else(|| anyhow!("Missing bitrate"))?;
            link::reconfigure(&ctl, iface_name, bitrate, DEFAULT_TX_QUEUE_LEN)?;
            println!("{}: bitrate {}, link left down", iface_name, bitrate);
        }
        "details" => {
            let link = ctl.resolve(iface_name)?;
            println!("{:#?}", link);
        }
        _ => return Err(anyhow!("Unknown link subcommand")),
    }
    Ok(())
}

/// Opens a session that leaves the link up when it's done.
fn open_session(iface_name: &str, bitrate: u32) -> Result<Session> {
    let config = SessionConfig::default()
        .with_bitrate(bitrate)
        .with_link_down_on_drop(false);
    let session = Session::with_config(iface_name, config);
    session
        .try_open()
        .with_context(|| format!("Unable to open '{}'", iface_name))?;
    Ok(session)
}

/// Process the 'send' subcommand.
fn send_cmd(iface_name: &str, opts: &ArgMatches) -> Result<()> {
    let bitrate = opts
        .get_one::<u32>("bitrate")
        .copied()
        .unwrap_or(DEFAULT_BITRATE);
    let frame: FrameDescriptor = opts
        .get_one::<String>("frame")
        .ok_or_else(|| anyhow!("Missing frame"))?
        .parse()?;

    let session = open_session(iface_name, bitrate)?;
    session.try_send(
        frame.raw_id(),
        frame.is_extended(),
        frame.len(),
        frame.payload(),
    )?;
    Ok(())
}

/// Process the 'monitor' subcommand.
///
/// Prints every frame until Ctrl-C, and the bus load at each interval.
fn monitor_cmd(iface_name: &str, opts: &ArgMatches) -> Result<()> {
    let bitrate = opts
        .get_one::<u32>("bitrate")
        .copied()
        .unwrap_or(DEFAULT_BITRATE);
    let interval = Duration::from_millis(
        opts.get_one::<u64>("interval")
            .copied()
            .unwrap_or(1000),
    );

    let session = Arc::new(open_session(iface_name, bitrate)?);

    let (quit_tx, quit_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(());
    })?;

    let rx_session = Arc::clone(&session);
    let poller = thread::spawn(move || rx_session.poll(|frame| println!("  {}", frame)));

    loop {
        match quit_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                println!("{}: bus load {}%", iface_name, session.bus_load());
            }
            _ => break,
        }
    }

    session.close();
    if !poller.join().map_err(|_| anyhow!("Poll thread panicked"))? {
        return Err(anyhow!("The poll loop did not start"));
    }
    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let opts = Command::new("candrv")
        .version(VERSION)
        .about("Command line tool to drive a CAN interface on Linux")
        .disable_help_flag(true)
        .arg(
            arg!(--help "Print help information")
                .short('?')
                .action(ArgAction::Help)
                .global(true),
        )
        .arg(
            arg!(<iface> "The CAN interface to use, like 'can0', 'vcan0', etc")
                .required(true)
                .index(1),
        )
        .subcommand(Command::new("up").about("Bring the interface up"))
        .subcommand(Command::new("down").about("Bring the interface down"))
        .subcommand(
            Command::new("bitrate")
                .about("Set the bit rate on the interface, leaving it down")
                .arg(
                    arg!(<bitrate> "The bit rate (in Hz)")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(Command::new("details").about("Get details about the interface"))
        .subcommand(
            Command::new("send")
                .about("Send a single frame")
                .arg(
                    arg!(<frame> "The frame, as <id>#<hexdata>, like '123#DEADBEEF'")
                        .required(true),
                )
                .arg(
                    arg!(-b --bitrate <bitrate> "The bit rate (in Hz)")
                        .required(false)
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("monitor")
                .about("Print the frames on the bus, and the bus load")
                .arg(
                    arg!(-i --interval <ms> "The bus load report interval, in ms")
                        .required(false)
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    arg!(-b --bitrate <bitrate> "The bit rate (in Hz)")
                        .required(false)
                        .value_parser(value_parser!(u32)),
                ),
        )
        .get_matches();

    let res = match (opts.get_one::<String>("iface"), opts.subcommand()) {
        (Some(iface_name), Some(("send", sub_opts))) => send_cmd(iface_name, sub_opts),
        (Some(iface_name), Some(("monitor", sub_opts))) => monitor_cmd(iface_name, sub_opts),
        (Some(iface_name), Some((cmd, sub_opts))) => link_cmd(iface_name, cmd, sub_opts),
        _ => Err(anyhow!("Need to specify a subcommand (-? for help).")),
    };

    if let Err(err) = res {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
