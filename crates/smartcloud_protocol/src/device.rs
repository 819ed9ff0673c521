//! Device addressing and model lookup

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Device Id
// ─────────────────────────────────────────────────────────────────────────────

/// Bus address of a field device: subnet and device number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    pub subnet: u8,
    pub device: u8,
}

impl DeviceId {
    /// Broadcast address `(0xFF, 0xFF)`
    pub const BROADCAST: DeviceId = DeviceId::new(0xFF, 0xFF);

    /// Address used by gateways/controllers when nothing else is configured
    pub const CONTROLLER: DeviceId = DeviceId::new(0x01, 0xFE);

    pub const fn new(subnet: u8, device: u8) -> Self {
        Self { subnet, device }
    }

    /// Unaddressed sender `(0x00, 0x00)`
    pub const UNASSIGNED: DeviceId = DeviceId::new(0x00, 0x00);

    /// Whether this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Whether a frame from this id can belong to a real device
    pub fn is_addressable(&self) -> bool {
        *self != Self::UNASSIGNED && !self.is_broadcast()
    }

    /// External lookup key: two bytes as four uppercase hex digits (e.g. `01FE`)
    pub fn key(&self) -> String {
        format!("{:02X}{:02X}", self.subnet, self.device)
    }

    /// Parse a key produced by [`DeviceId::key`]
    pub fn from_key(key: &str) -> Option<Self> {
        if key.len() != 4 || !key.is_ascii() {
            return None;
        }
        let subnet = u8::from_str_radix(&key[..2], 16).ok()?;
        let device = u8::from_str_radix(&key[2..], 16).ok()?;
        Some(Self::new(subnet, device))
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.subnet, self.device]
    }
}

impl From<(u8, u8)> for DeviceId {
    fn from((subnet, device): (u8, u8)) -> Self {
        Self::new(subnet, device)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subnet, self.device)
    }
}

/// Error returned when a device id string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device id '{0}': expected 'subnet.device' or four hex digits")]
pub struct ParseDeviceIdError(pub String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    /// Accepts the dotted form `1.254` or the hex key form `01FE`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((subnet, device)) = s.split_once('.') {
            let subnet = subnet.parse().map_err(|_| ParseDeviceIdError(s.to_string()))?;
            let device = device.parse().map_err(|_| ParseDeviceIdError(s.to_string()))?;
            return Ok(Self::new(subnet, device));
        }
        Self::from_key(s).ok_or_else(|| ParseDeviceIdError(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Names
// ─────────────────────────────────────────────────────────────────────────────

/// Known device type codes and their model names
const MODEL_NAMES: &[(u16, &str)] = &[
    (0x0000, "Control Panel (Generic)"),
    (0x0001, "Single Channel Lighting"),
    (0x0030, "Security Module"),
    (0x0041, "Curtain Switch"),
    (0x0051, "Universal Switch Type 1"),
    (0x0052, "Panel Control AC"),
    (0x0053, "Universal Switch Type 3"),
    (0x0054, "Universal Switch Type 4"),
    (0x0056, "Scene Switch"),
    (0x0076, "TIS-4DI-IN (4 Zone Digital Input)"),
    (0x0077, "HVAC6-3A-T (HVAC Air Condition)"),
    (0x0085, "Audio Player Module"),
    (0x0132, "TIS-IR-CUR (IR Emitter)"),
    (0x0135, "ES-10F-CM (10 Functions Sensor)"),
    (0x01A8, "RLY-4CH-10A (Relay 4ch 10A)"),
    (0x01AA, "VLC-6CH-3A (Valve Controller 6CH)"),
    (0x01AC, "RLY-8CH-16A (Relay 8ch 16A)"),
    (0x01B8, "VLC-12CH-10A (Valve Controller 12CH)"),
    (0x0258, "DIM-6CH-2A (Dimmer 6ch 2A)"),
    (0x0259, "DIM-4CH-3A (Dimmer 4ch 3A)"),
    (0x025A, "DIM-2CH-6A (Dimmer 2ch 6A)"),
    (0x0454, "TIS-AUT-TMR (Automation Timer)"),
    (0x04B1, "IP-COM-PORT-OLD"),
    (0x0BE9, "TIS-SEC-SM (Security Module)"),
    (0x8022, "TIS-HEALTH-CM (Health Sensor)"),
    (0x806B, "TIS-MER-8G-PB (Mercury 8G Panel)"),
    (0x806C, "TIS-MER-AC4G-PB (Mercury AC 4G Panel)"),
    (0x80AE, "TIS-HEALTH-CM-RADAR"),
    (0x80B0, "TIS-RADAR-SENSOR"),
    (0xFFFE, "Light Dimmer (Generic)"),
];

/// Look up the model name for a device type code
pub fn model_name(device_type: u16) -> Option<&'static str> {
    MODEL_NAMES
        .iter()
        .find(|(code, _)| *code == device_type)
        .map(|(_, name)| *name)
}

/// Model name, or the hex code (`0x1234`) for unknown types
pub fn model_name_or_hex(device_type: u16) -> String {
    model_name(device_type)
        .map(str::to_string)
        .unwrap_or_else(|| format!("0x{device_type:04X}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let id = DeviceId::new(1, 254);
        assert_eq!(id.key(), "01FE");
        assert_eq!(DeviceId::from_key("01FE"), Some(id));
        assert_eq!(DeviceId::from_key("01fe"), Some(id));
        assert_eq!(DeviceId::from_key("1FE"), None);
        assert_eq!(DeviceId::from_key("ZZZZ"), None);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("1.254".parse::<DeviceId>().unwrap(), DeviceId::new(1, 254));
        assert_eq!("0A14".parse::<DeviceId>().unwrap(), DeviceId::new(10, 20));
        assert!("1.256".parse::<DeviceId>().is_err());
        assert!("nope".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_display_and_broadcast() {
        assert_eq!(DeviceId::new(1, 15).to_string(), "1.15");
        assert!(DeviceId::BROADCAST.is_broadcast());
        assert!(!DeviceId::CONTROLLER.is_broadcast());
    }

    #[test]
    fn test_addressable() {
        assert!(DeviceId::CONTROLLER.is_addressable());
        assert!(DeviceId::new(0, 1).is_addressable());
        assert!(!DeviceId::UNASSIGNED.is_addressable());
        assert!(!DeviceId::BROADCAST.is_addressable());
    }

    #[test]
    fn test_model_lookup() {
        assert_eq!(model_name(0x0258), Some("DIM-6CH-2A (Dimmer 6ch 2A)"));
        assert_eq!(model_name(0x1234), None);
        assert_eq!(model_name_or_hex(0x1234), "0x1234");
        assert_eq!(model_name_or_hex(0x8022), "TIS-HEALTH-CM (Health Sensor)");
    }
}
