//! CLI subcommands

mod devices;
mod discover;
mod listen;
mod ports;
mod send;
mod set_channel;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use smartcloud_protocol::{DeviceId, model_name_or_hex};
use smartcloud_runtime::{CommunicationManager, Device, Inbound, Route};

pub use devices::DevicesArgs;
pub use discover::DiscoverArgs;
pub use listen::ListenArgs;
pub use ports::PortsArgs;
pub use send::SendArgs;
pub use set_channel::SetChannelArgs;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Broadcast discovery requests and list the devices that answer
    Discover(DiscoverArgs),
    /// Print every frame received until interrupted
    Listen(ListenArgs),
    /// Send a raw opcode to a device
    Send(SendArgs),
    /// Set one output channel of a dimmer or relay
    SetChannel(SetChannelArgs),
    /// Listen passively for a while, then print the device table
    Devices(DevicesArgs),
    /// List serial ports usable for RS-485
    Ports(PortsArgs),
}

impl Command {
    /// Whether the command talks to the bus at all
    pub fn needs_transport(&self) -> bool {
        !matches!(self, Self::Ports(_))
    }

    pub async fn run(self, manager: &CommunicationManager) -> Result<()> {
        match self {
            Self::Discover(args) => discover::run(manager, args).await,
            Self::Listen(args) => listen::run(manager, args).await,
            Self::Send(args) => send::run(manager, args).await,
            Self::SetChannel(args) => set_channel::run(manager, args).await,
            Self::Devices(args) => devices::run(manager, args).await,
            Self::Ports(args) => ports::run(args),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `0x0031`, `0031` or `31` as a hex u16
pub fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{s}': {e}"))
}

/// Parse hex bytes, with or without separators (`01 32 00`, `01:32:00`, `013200`)
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-' | ','))
        .collect();

    if !digits.is_ascii() {
        return Err(format!("non-hex characters in '{s}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{s}'"));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("invalid hex byte '{}': {e}", &digits[i..i + 2]))
        })
        .collect()
}

/// Hex byte string argument
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_bytes(s).map(Self)
    }
}

/// One-line description of a received frame
pub fn describe(inbound: &Inbound) -> String {
    let frame = &inbound.frame;
    let packet = &frame.packet;

    let mut line = format!(
        "[{}] {} -> {} {}",
        inbound.transport,
        packet.source_device(),
        packet.target_device(),
        packet.op_code(),
    );
    if let Some(label) = packet.op_code().label() {
        line.push_str(&format!(" ({label})"));
    }
    line.push_str(&format!(
        " type={} {}",
        model_name_or_hex(packet.device_type()),
        inbound.payload()
    ));
    if !frame.has_standard_header() {
        line.push_str(&format!(" header={:?}", frame.header_text()));
    }
    if !frame.crc_valid {
        line.push_str(" crc=BAD");
    }
    line
}

pub fn print_devices(devices: &[Device]) {
    if devices.is_empty() {
        println!("No devices found");
        return;
    }

    println!(
        "{:<6} {:<9} {:<7} {:<16} {:<24} {:<38} {}",
        "KEY", "ADDRESS", "LINK", "GATEWAY", "NAME", "MODEL", "STATE"
    );
    for device in devices {
        let gateway = device
            .gateway_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<6} {:<9} {:<7} {:<16} {:<24} {:<38} {}",
            device.key(),
            device.device_id.to_string(),
            device.transport.to_string(),
            gateway,
            device.name.as_deref().unwrap_or("-"),
            device.model_name,
            if device.online { "online" } else { "offline" },
        );
    }
}

/// Print frames from `device` for `wait`, then stop listening
pub async fn watch_replies(manager: &CommunicationManager, device: DeviceId, wait: Duration) {
    if wait.is_zero() {
        return;
    }

    let id = manager.on(Route::Any, move |inbound: &Inbound| {
        if inbound.packet().source_device() == device {
            println!("{}", describe(inbound));
        }
    });
    tokio::time::sleep(wait).await;
    manager.off(id);
}
