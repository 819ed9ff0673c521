use std::time::Duration;

use anyhow::Result;
use clap::Args;
use smartcloud_protocol::{DeviceId, OpCode};
use smartcloud_runtime::CommunicationManager;

use super::{HexBytes, parse_hex_u16, watch_replies};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target device, `subnet.device` or four hex digits
    pub device: DeviceId,

    /// Operation code in hex, e.g. 0xEFFF
    #[arg(value_parser = parse_hex_u16)]
    pub op_code: u16,

    /// Additional data in hex, e.g. "01 32 00 00"
    pub data: Option<HexBytes>,

    /// Seconds to print replies from the device afterwards
    #[arg(short, long, default_value_t = 2)]
    pub wait: u64,
}

pub async fn run(manager: &CommunicationManager, args: SendArgs) -> Result<()> {
    let op_code = OpCode(args.op_code);
    manager
        .send_to_device(args.device, op_code, args.data.unwrap_or_default().0)
        .await?;
    println!("Sent {op_code} to {}", args.device);

    watch_replies(manager, args.device, Duration::from_secs(args.wait)).await;
    Ok(())
}
