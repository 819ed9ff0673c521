use anyhow::Result;
use clap::Args;
use smartcloud_runtime::{SerialPortEntry, available_ports};

#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs without connecting any transport
pub fn run(args: PortsArgs) -> Result<()> {
    let ports = available_ports()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else {
        print!("{}", format_ports(&ports));
    }
    Ok(())
}

fn format_ports(ports: &[SerialPortEntry]) -> String {
    if ports.is_empty() {
        return "No serial ports found\n".into();
    }

    let mut out = format!("{:<24} {:<10} {}\n", "PATH", "KIND", "DESCRIPTION");
    for port in ports {
        out.push_str(&format!(
            "{:<24} {:<10} {}\n",
            port.path,
            port.kind,
            port.description.as_deref().unwrap_or("-")
        ));
    }
    out
}
