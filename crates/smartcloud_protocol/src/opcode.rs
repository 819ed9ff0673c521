//! Operation codes
//!
//! The protocol has no acknowledgment primitive and several firmware
//! generations answer discovery on different wire opcodes. Those are all
//! folded into one logical discovery response via [`is_discovery_response`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// 16-bit operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpCode(pub u16);

impl OpCode {
    // Discovery
    pub const DISCOVERY_REQUEST: OpCode = OpCode(0x000E);
    pub const DISCOVERY_RESPONSE: OpCode = OpCode(0x000F);
    pub const LEGACY_DISCOVERY_REQUEST: OpCode = OpCode(0xF003);
    pub const LEGACY_DISCOVERY_RESPONSE: OpCode = OpCode(0xF004);
    pub const ALT_DISCOVERY_REQUEST: OpCode = OpCode(0xDA44);
    pub const ALT_DISCOVERY_RESPONSE: OpCode = OpCode(0xDA45);
    pub const GENERIC_RESPONSE: OpCode = OpCode(0x0002);

    // Firmware
    pub const FIRMWARE_QUERY: OpCode = OpCode(0xEFFF);
    pub const FIRMWARE_RESPONSE: OpCode = OpCode(0xEFFE);

    // Sensors and channel states share the same query/response pair
    pub const SENSOR_QUERY: OpCode = OpCode(0x2024);
    pub const SENSOR_RESPONSE: OpCode = OpCode(0x2025);

    // Channels
    pub const CHANNEL_TYPES: OpCode = OpCode(0x0005);
    pub const SINGLE_CHANNEL_SET: OpCode = OpCode(0x0031);
    pub const SINGLE_CHANNEL_ACK: OpCode = OpCode(0x0032);
    pub const CHANNEL_LEVELS_QUERY: OpCode = OpCode(0x0033);
    pub const CHANNEL_LEVELS_RESPONSE: OpCode = OpCode(0x0034);

    // Climate
    pub const AC_STATUS: OpCode = OpCode(0xE0ED);
    pub const AC_STATUS_EXT: OpCode = OpCode(0xE0EE);
    pub const AC_STATUS_ALT: OpCode = OpCode(0xE0EF);

    pub const STATUS_RESPONSE: OpCode = OpCode(0x0281);

    pub const fn value(self) -> u16 {
        self.0
    }

    /// Human-readable label for logs, if the opcode is known
    pub fn label(self) -> Option<&'static str> {
        let label = match self {
            Self::DISCOVERY_REQUEST => "discovery request",
            Self::DISCOVERY_RESPONSE => "discovery response",
            Self::LEGACY_DISCOVERY_REQUEST => "legacy discovery request",
            Self::LEGACY_DISCOVERY_RESPONSE => "legacy discovery response",
            Self::ALT_DISCOVERY_REQUEST => "alt discovery request",
            Self::ALT_DISCOVERY_RESPONSE => "alt discovery response",
            Self::GENERIC_RESPONSE => "generic response",
            Self::FIRMWARE_QUERY => "firmware query",
            Self::FIRMWARE_RESPONSE => "firmware response",
            Self::SENSOR_QUERY => "sensor query",
            Self::SENSOR_RESPONSE => "sensor response",
            Self::CHANNEL_TYPES => "channel types",
            Self::SINGLE_CHANNEL_SET => "single channel set",
            Self::SINGLE_CHANNEL_ACK => "single channel ack",
            Self::CHANNEL_LEVELS_QUERY => "channel levels query",
            Self::CHANNEL_LEVELS_RESPONSE => "channel levels",
            Self::AC_STATUS | Self::AC_STATUS_EXT | Self::AC_STATUS_ALT => "ac status",
            Self::STATUS_RESPONSE => "status",
            _ => return None,
        };
        Some(label)
    }
}

impl From<u16> for OpCode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<OpCode> for u16 {
    fn from(op: OpCode) -> Self {
        op.0
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Opcodes sent during a discovery broadcast, in send order
pub const DISCOVERY_REQUESTS: [OpCode; 3] = [
    OpCode::DISCOVERY_REQUEST,
    OpCode::LEGACY_DISCOVERY_REQUEST,
    OpCode::ALT_DISCOVERY_REQUEST,
];

/// Wire opcodes that all mean "a device answered discovery"
///
/// `0xF003` (also the unique-id query) and `0xDA44` double as requests.
/// Some firmware answers with the request opcode, so both stay listed. A
/// request from another controller with text in it is then read as a name;
/// its sender is usually `0.0` or the broadcast id, which the registry skips.
pub const DISCOVERY_RESPONSES: [OpCode; 6] = [
    OpCode::DISCOVERY_RESPONSE,
    OpCode::LEGACY_DISCOVERY_REQUEST,
    OpCode::LEGACY_DISCOVERY_RESPONSE,
    OpCode::ALT_DISCOVERY_REQUEST,
    OpCode::ALT_DISCOVERY_RESPONSE,
    OpCode::GENERIC_RESPONSE,
];

pub fn is_discovery_response(op: OpCode) -> bool {
    DISCOVERY_RESPONSES.contains(&op)
}
