use std::time::Duration;

use anyhow::Result;
use clap::Args;
use smartcloud_runtime::CommunicationManager;

use super::print_devices;

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Seconds to wait for answers after broadcasting (default from config)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(manager: &CommunicationManager, args: DiscoverArgs) -> Result<()> {
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| manager.config().discovery.timeout());

    let report = manager.discover(timeout).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_devices(&report.devices);
    println!(
        "\n{} device(s), {} new",
        report.devices.len(),
        report.new_devices.len()
    );
    Ok(())
}
