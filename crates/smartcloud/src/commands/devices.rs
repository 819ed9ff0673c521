use std::time::Duration;

use anyhow::Result;
use clap::Args;
use smartcloud_runtime::CommunicationManager;
use tracing::info;

use super::{parse_hex_u16, print_devices};

#[derive(Args, Debug)]
pub struct DevicesArgs {
    /// Seconds to listen before printing (default: discovery timeout)
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Only show devices of this type code (hex)
    #[arg(long = "type", value_parser = parse_hex_u16)]
    pub device_type: Option<u16>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(manager: &CommunicationManager, args: DevicesArgs) -> Result<()> {
    let duration = args
        .duration
        .map(Duration::from_secs)
        .unwrap_or_else(|| manager.config().discovery.timeout());

    info!(?duration, "Listening passively");
    tokio::time::sleep(duration).await;

    let devices = match args.device_type {
        Some(device_type) => manager.registry().devices_by_type(device_type),
        None => manager.registry().snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print_devices(&devices);
    }
    Ok(())
}
