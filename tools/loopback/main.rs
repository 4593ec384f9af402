//! Loopback exercise on the simulated bus.
//!
//! Attaches a system controller and one device board to a `SimBus`, then for each
//! iteration addresses the device as listener, writes a message, addresses it as talker
//! and reads the echo back. Finishes with a serial poll of the device.
//!
//! ```text
//! cargo run --bin gpib_loopback -- --message '*IDN?' --iterations 10
//! RUST_LOG=gpib_bitbang=trace cargo run --bin gpib_loopback
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use gpib_bitbang::commands::{address_listener, address_talker};
use gpib_bitbang::logging::init_tracing;
use gpib_bitbang::{
    BoardConfig, EosWidth, GpibBoard, SimBus, StatusBits, TimeoutCode, TransferError,
};

/// Status byte the simulated device answers a serial poll with (RQS plus bit 0).
const DEVICE_STATUS: u8 = 0x41;
const BUFFER_LEN: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "gpib_loopback", about = "Run the GPIB handshake engine against a simulated device")]
struct Args {
    /// Controller board configuration (TOML). GPIB_* environment variables still apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Message written to the device on every iteration.
    #[arg(short, long, default_value = "*IDN?")]
    message: String,

    /// Primary address of the simulated device.
    #[arg(long, default_value_t = 5)]
    device_address: u8,

    #[arg(short = 'n', long, default_value_t = 1)]
    iterations: usize,

    /// Transfer timeout in milliseconds, rounded up to the next standard code.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Device side: listen, echo, then answer one serial poll.
async fn run_device(
    mut device: GpibBoard,
    iterations: usize,
) -> Result<GpibBoard, TransferError> {
    let mut buf = [0u8; BUFFER_LEN];
    for _ in 0..iterations {
        // UNL, MTA(controller), MLA(device)
        let deadline = device.deadline();
        device.read(&mut buf[..3], deadline).await?;

        let deadline = device.deadline();
        let message = device.read(&mut buf, deadline).await?;

        // UNL, MLA(controller), MTA(device)
        let mut commands = [0u8; 3];
        let deadline = device.deadline();
        device.read(&mut commands, deadline).await?;

        let deadline = device.deadline();
        device.write(&buf[..message.count], true, deadline).await?;
    }

    // UNL, MLA(controller), SPE, MTA(device)
    let mut commands = [0u8; 4];
    let deadline = device.deadline();
    device.read(&mut commands, deadline).await?;
    let deadline = device.deadline();
    device.write(&[DEVICE_STATUS], false, deadline).await?;
    // SPD, UNT
    let deadline = device.deadline();
    device.read(&mut commands[..2], deadline).await?;
    Ok(device)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log)?;

    let mut config = BoardConfig::load(args.config.as_deref()).context("loading board config")?;
    if let Some(ms) = args.timeout_ms {
        config.timeout = TimeoutCode::at_least(Duration::from_millis(ms));
    }
    let own = config.primary_address;
    let dev = args.device_address;
    if own == dev {
        bail!("device address {dev} collides with the controller address");
    }

    let bus = SimBus::new();
    let device_config = BoardConfig {
        pins: config.pins.clone(),
        timeout: config.timeout,
        ..BoardConfig::device("sim-device", dev)
    };
    let mut controller = GpibBoard::attach(config, bus.attach_node()?)?;
    let mut device = GpibBoard::attach(device_config, bus.attach_node()?)?;
    device.configure_eos(b'\n', true, EosWidth::SevenBit);

    controller.interface_clear()?;
    controller.set_remote_enable(true)?;

    let device_task = tokio::spawn(run_device(device, args.iterations));

    let mut message = args.message.into_bytes();
    message.push(b'\n');
    let started = Instant::now();
    let mut echo = [0u8; BUFFER_LEN];

    for iteration in 0..args.iterations {
        controller.take_control()?;
        controller.send_command(&address_listener(own, dev, None)?).await?;
        controller.release_control();
        let deadline = controller.deadline();
        controller.write(&message, true, deadline).await?;

        controller.take_control()?;
        controller.send_command(&address_talker(own, dev, None)?).await?;
        controller.release_control();
        let deadline = controller.deadline();
        let outcome = controller.read(&mut echo, deadline).await?;

        let reply = &echo[..outcome.count];
        if reply != message.as_slice() {
            warn!(iteration, sent = ?String::from_utf8_lossy(&message), received = ?String::from_utf8_lossy(reply), "echo mismatch");
            bail!("echo mismatch on iteration {iteration}");
        }
        info!(iteration, bytes = outcome.count, end = outcome.end, "echo ok");
    }

    let status = controller.serial_poll(dev).await?;
    info!(status = format_args!("{status:#04x}"), "serial poll");

    let device = device_task.await.context("device task panicked")??;
    controller.release_control();
    controller.set_remote_enable(false)?;

    let elapsed = started.elapsed();
    info!(
        iterations = args.iterations,
        elapsed_ms = elapsed.as_millis() as u64,
        status = ?controller.query_status(StatusBits::empty()),
        "loopback finished"
    );

    device.detach();
    controller.detach();
    Ok(())
}
