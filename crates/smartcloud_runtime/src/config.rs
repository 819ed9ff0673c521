//! Runtime Configuration Types
//!
//! Every section has defaults so an empty file is a valid configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartcloud_protocol::DeviceId;

/// Inter-opcode spacing during a discovery broadcast
pub const OPCODE_SPACING: Duration = Duration::from_secs(1);

/// Grace period after the caller timeout for late name responses
pub const EXTENDED_WAIT: Duration = Duration::from_secs(3);

pub const DEFAULT_UDP_PORT: u16 = 6000;
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartcloudConfig {
    #[serde(default)]
    pub udp: UdpConfig,
    /// RS-485 is only used when a serial path is configured
    #[serde(default)]
    pub rs485: Option<Rs485Config>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: Ipv4Addr,
    #[serde(default = "default_udp_port")]
    pub port: u16,
    #[serde(default = "default_broadcast")]
    pub broadcast: Ipv4Addr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_ip: default_bind_ip(),
            port: DEFAULT_UDP_PORT,
            broadcast: default_broadcast(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_broadcast() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rs485Config {
    /// Serial device path (e.g. `/dev/ttyUSB0`)
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Rs485Config {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Discovery timings. Spacing and extended wait are protocol constants;
/// overriding them is meant for tests and unusual buses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_opcode_spacing_ms")]
    pub opcode_spacing_ms: u64,
    #[serde(default = "default_extended_wait_ms")]
    pub extended_wait_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            opcode_spacing_ms: default_opcode_spacing_ms(),
            extended_wait_ms: default_extended_wait_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn opcode_spacing(&self) -> Duration {
        Duration::from_millis(self.opcode_spacing_ms)
    }

    pub fn extended_wait(&self) -> Duration {
        Duration::from_millis(self.extended_wait_ms)
    }
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_opcode_spacing_ms() -> u64 {
    OPCODE_SPACING.as_millis() as u64
}

fn default_extended_wait_ms() -> u64 {
    EXTENDED_WAIT.as_millis() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// How this controller presents itself on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_bind_ip")]
    pub source_ip: Ipv4Addr,
    #[serde(default = "default_subnet")]
    pub subnet: u8,
    #[serde(default = "default_device")]
    pub device: u8,
    #[serde(default = "default_device_type")]
    pub device_type: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            source_ip: Ipv4Addr::UNSPECIFIED,
            subnet: default_subnet(),
            device: default_device(),
            device_type: default_device_type(),
        }
    }
}

impl IdentityConfig {
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.subnet, self.device)
    }
}

fn default_subnet() -> u8 {
    DeviceId::CONTROLLER.subnet
}

fn default_device() -> u8 {
    DeviceId::CONTROLLER.device
}

fn default_device_type() -> u16 {
    smartcloud_protocol::packet::DEFAULT_DEVICE_TYPE
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// What to do with frames whose CRC does not match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcPolicy {
    /// Drop before the registry and handlers see them
    #[default]
    Discard,
    /// Treat them like valid frames
    Accept,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub crc_policy: CrcPolicy,
    #[serde(default = "default_offline_after_secs")]
    pub offline_after_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            crc_policy: CrcPolicy::default(),
            offline_after_secs: default_offline_after_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn offline_after(&self) -> Duration {
        Duration::from_secs(self.offline_after_secs)
    }
}

fn default_offline_after_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SmartcloudConfig::default();
        assert!(config.udp.enabled);
        assert_eq!(config.udp.port, 6000);
        assert_eq!(config.udp.broadcast, Ipv4Addr::new(255, 255, 255, 255));
        assert!(config.rs485.is_none());
        assert_eq!(config.discovery.timeout(), Duration::from_secs(5));
        assert_eq!(config.discovery.opcode_spacing(), OPCODE_SPACING);
        assert_eq!(config.discovery.extended_wait(), EXTENDED_WAIT);
        assert_eq!(config.identity.device_id(), DeviceId::new(1, 254));
        assert_eq!(config.identity.device_type, 0xFFFE);
        assert_eq!(config.registry.crc_policy, CrcPolicy::Discard);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: SmartcloudConfig = serde_json::from_value(serde_json::json!({
            "udp": { "port": 6001 },
            "rs485": { "path": "/dev/ttyUSB0" },
            "registry": { "crc_policy": "accept" }
        }))
        .unwrap();

        assert_eq!(config.udp.port, 6001);
        assert_eq!(config.udp.bind_ip, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.rs485, Some(Rs485Config::new("/dev/ttyUSB0")));
        assert_eq!(config.registry.crc_policy, CrcPolicy::Accept);
        assert_eq!(config.registry.offline_after_secs, 300);
    }
}
