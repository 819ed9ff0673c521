use std::time::Duration;

use anyhow::Result;
use clap::Args;
use smartcloud_runtime::{CommunicationManager, Inbound, Route};
use tracing::info;

use super::describe;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    pub duration: Option<u64>,
}

pub async fn run(manager: &CommunicationManager, args: ListenArgs) -> Result<()> {
    let id = manager.on(Route::Any, |inbound: &Inbound| println!("{}", describe(inbound)));

    let stop = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = sweep.tick() => {
                let went_offline = manager.sweep_offline();
                if went_offline > 0 {
                    info!(went_offline, online = manager.registry().online_count(), "Devices went offline");
                }
            }
        }
    }

    manager.off(id);
    info!(devices = manager.registry().len(), "Stopped listening");
    Ok(())
}
