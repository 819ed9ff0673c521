//! SMARTCLOUD CLI
//!
//! Discovery, monitoring and commands for SMARTCLOUD field devices over UDP or
//! RS-485.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use smartcloud::commands::Command;
use smartcloud::config::{self, Overrides};
use smartcloud::logging;
use smartcloud_runtime::CommunicationManager;

/// SMARTCLOUD field-bus tool
#[derive(Parser, Debug)]
#[command(name = "smartcloud")]
#[command(about = "Talk to SMARTCLOUD building-automation devices", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local address to bind the UDP socket to
    #[arg(long, global = true)]
    bind: Option<Ipv4Addr>,

    /// UDP port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// UDP broadcast address
    #[arg(long, global = true)]
    broadcast: Option<Ipv4Addr>,

    /// RS-485 serial device
    #[arg(long, global = true)]
    serial: Option<PathBuf>,

    /// RS-485 baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Disable the UDP transport
    #[arg(long, global = true)]
    no_udp: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.log_json, args.verbose);

    let overrides = Overrides {
        bind_ip: args.bind,
        port: args.port,
        broadcast: args.broadcast,
        serial: args.serial.clone(),
        baud_rate: args.baud,
        no_udp: args.no_udp,
    };
    let config = config::load(args.config.as_deref(), &overrides).context("Loading configuration")?;

    info!("Starting smartcloud v{}", env!("CARGO_PKG_VERSION"));

    let manager = CommunicationManager::from_config(config);
    if args.command.needs_transport() {
        manager
            .connect_all()
            .await
            .context("No transport could be connected")?;
    }

    let result = args.command.run(&manager).await;
    manager.shutdown().await;
    result
}
