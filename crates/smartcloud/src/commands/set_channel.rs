use std::time::Duration;

use anyhow::Result;
use clap::Args;
use smartcloud_protocol::DeviceId;
use smartcloud_runtime::CommunicationManager;

use super::watch_replies;

#[derive(Args, Debug)]
pub struct SetChannelArgs {
    /// Target device, `subnet.device` or four hex digits
    pub device: DeviceId,

    /// Channel number (1-based)
    pub channel: u8,

    /// Level 0-100
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub level: u8,

    /// Seconds to print replies (the 0x0032 ack) afterwards
    #[arg(short, long, default_value_t = 2)]
    pub wait: u64,
}

pub async fn run(manager: &CommunicationManager, args: SetChannelArgs) -> Result<()> {
    manager
        .set_channel(args.device, args.channel, args.level)
        .await?;
    println!(
        "Set {} channel {} to {}%",
        args.device, args.channel, args.level
    );

    watch_replies(manager, args.device, Duration::from_secs(args.wait)).await;
    Ok(())
}
