//! Configuration loading
//!
//! Layers, lowest to highest priority: built-in defaults, the TOML file,
//! `SMARTCLOUD_` environment variables (`__` separates sections, e.g.
//! `SMARTCLOUD_UDP__PORT=6001`), then command-line overrides.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use smartcloud_runtime::{Rs485Config, SmartcloudConfig};

pub const DEFAULT_CONFIG_FILE: &str = "smartcloud.toml";
pub const ENV_PREFIX: &str = "SMARTCLOUD_";

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind_ip: Option<Ipv4Addr>,
    pub port: Option<u16>,
    pub broadcast: Option<Ipv4Addr>,
    pub serial: Option<PathBuf>,
    pub baud_rate: Option<u32>,
    pub no_udp: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut SmartcloudConfig) {
        if let Some(ip) = self.bind_ip {
            config.udp.bind_ip = ip;
        }
        if let Some(port) = self.port {
            config.udp.port = port;
        }
        if let Some(broadcast) = self.broadcast {
            config.udp.broadcast = broadcast;
        }
        if self.no_udp {
            config.udp.enabled = false;
        }
        if let Some(path) = &self.serial {
            let path = path.display().to_string();
            match config.rs485.as_mut() {
                Some(rs485) => rs485.path = path,
                None => config.rs485 = Some(Rs485Config::new(path)),
            }
        }
        if let (Some(baud), Some(rs485)) = (self.baud_rate, config.rs485.as_mut()) {
            rs485.baud_rate = baud;
        }
    }
}

/// Defaults plus the TOML file, if it exists
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(SmartcloudConfig::default())).merge(Toml::file(path))
}

/// Load the full layered configuration
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<SmartcloudConfig, figment::Error> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let mut config: SmartcloudConfig = figment(path)
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;

    overrides.apply(&mut config);
    Ok(config)
}
