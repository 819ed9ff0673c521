//! Opcode-specific payload decoding
//!
//! [`interpret`] never fails. Truncated payloads produce absent fields and
//! anything unrecognised comes back as [`DecodedPayload::Raw`].

use std::fmt;

use bytes::Bytes;
use serde_json::{Value, json};

use crate::opcode::{OpCode, is_discovery_response};

/// Readings carried by a sensor/channel-state response (`0x2025`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorBlock {
    /// Every payload byte, as relay/dimmer modules report channel states
    pub states: Vec<u8>,
    pub lux: Option<u16>,
    pub noise: Option<u16>,
    pub eco2: Option<u16>,
    pub tvoc: Option<u16>,
    pub temperature: Option<u8>,
    pub humidity: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcStatus {
    pub power: Option<bool>,
    pub mode: Option<u8>,
    pub set_temperature: Option<u8>,
    pub fan: Option<u8>,
}

/// Typed view of a frame's additional data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPayload {
    /// Discovery response text; may be empty
    DeviceName(String),
    /// First eight bytes of a `0xF004` response as `AA:BB:...`
    UniqueId(String),
    FirmwareVersion(String),
    SensorBlock(SensorBlock),
    AcStatus(AcStatus),
    ChannelTypes {
        quantity: u8,
        kind: Option<u8>,
        types: Vec<u8>,
    },
    ChannelLevels {
        quantity: u8,
        levels: Vec<u8>,
    },
    ChannelAck {
        channel: u8,
        level: Option<u8>,
        status: Option<u8>,
    },
    Status(u8),
    Raw(Bytes),
}

/// Decode `data` according to `op_code`
pub fn interpret(op_code: OpCode, data: &[u8]) -> DecodedPayload {
    if data.is_empty() {
        return DecodedPayload::Raw(Bytes::new());
    }

    match op_code {
        OpCode::LEGACY_DISCOVERY_RESPONSE if data.len() >= 8 => {
            DecodedPayload::UniqueId(colon_hex(&data[..8]))
        }
        op if is_discovery_response(op) => DecodedPayload::DeviceName(extract_cstr(data)),
        OpCode::FIRMWARE_RESPONSE => DecodedPayload::FirmwareVersion(extract_cstr(data)),
        OpCode::SENSOR_RESPONSE => DecodedPayload::SensorBlock(sensor_block(data)),
        OpCode::AC_STATUS | OpCode::AC_STATUS_EXT | OpCode::AC_STATUS_ALT => {
            DecodedPayload::AcStatus(AcStatus {
                power: data.first().map(|b| *b != 0),
                mode: data.get(1).copied(),
                set_temperature: data.get(2).copied(),
                fan: data.get(3).copied(),
            })
        }
        OpCode::CHANNEL_TYPES => {
            let quantity = data[0];
            let end = (2 + quantity as usize).min(data.len());
            DecodedPayload::ChannelTypes {
                quantity,
                kind: data.get(1).copied(),
                types: data.get(2..end).map(<[u8]>::to_vec).unwrap_or_default(),
            }
        }
        OpCode::CHANNEL_LEVELS_RESPONSE => {
            let quantity = data[0];
            let end = (1 + quantity as usize).min(data.len());
            DecodedPayload::ChannelLevels {
                quantity,
                levels: data[1..end].to_vec(),
            }
        }
        OpCode::SINGLE_CHANNEL_ACK => DecodedPayload::ChannelAck {
            channel: data[0],
            level: data.get(1).copied(),
            status: data.get(2).copied(),
        },
        OpCode::STATUS_RESPONSE => DecodedPayload::Status(data[0]),
        _ => DecodedPayload::Raw(Bytes::copy_from_slice(data)),
    }
}

fn sensor_block(data: &[u8]) -> SensorBlock {
    let word = |hi: usize| -> Option<u16> {
        match (data.get(hi), data.get(hi + 1)) {
            (Some(h), Some(l)) => Some(u16::from_be_bytes([*h, *l])),
            _ => None,
        }
    };

    SensorBlock {
        states: data.to_vec(),
        lux: word(5),
        noise: word(7),
        eco2: word(9),
        tvoc: word(11),
        temperature: data.get(13).copied(),
        humidity: data.get(14).copied(),
    }
}

/// Text up to the first NUL, trimmed
fn extract_cstr(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).trim().to_string()
}

fn colon_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

impl DecodedPayload {
    /// Non-empty device name, if this is a discovery response carrying one
    pub fn device_name(&self) -> Option<&str> {
        match self {
            Self::DeviceName(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    pub fn firmware_version(&self) -> Option<&str> {
        match self {
            Self::FirmwareVersion(version) if !version.is_empty() => Some(version),
            _ => None,
        }
    }

    /// Flatten into registry state entries.
    ///
    /// Name and firmware are device fields, not state, so they yield nothing.
    pub fn state_entries(&self) -> Vec<(String, Value)> {
        let mut entries = Vec::new();
        let mut push = |key: &str, value: Value| entries.push((key.to_string(), value));

        match self {
            Self::DeviceName(_) | Self::FirmwareVersion(_) | Self::Raw(_) => {}
            Self::UniqueId(id) => push("unique_id", json!(id)),
            Self::SensorBlock(block) => {
                push("channel_states", json!(block.states));
                if let Some(v) = block.lux {
                    push("lux", json!(v));
                }
                if let Some(v) = block.noise {
                    push("noise", json!(v));
                }
                if let Some(v) = block.eco2 {
                    push("eco2", json!(v));
                }
                if let Some(v) = block.tvoc {
                    push("tvoc", json!(v));
                }
                if let Some(v) = block.temperature {
                    push("temperature", json!(v));
                }
                if let Some(v) = block.humidity {
                    push("humidity", json!(v));
                }
            }
            Self::AcStatus(ac) => {
                if let Some(v) = ac.power {
                    push("ac_power", json!(v));
                }
                if let Some(v) = ac.mode {
                    push("ac_mode", json!(v));
                }
                if let Some(v) = ac.set_temperature {
                    push("ac_set_temperature", json!(v));
                }
                if let Some(v) = ac.fan {
                    push("ac_fan", json!(v));
                }
            }
            Self::ChannelTypes {
                quantity,
                kind,
                types,
            } => {
                // A zero quantity carries nothing worth keeping
                if *quantity > 0 {
                    push("channel_quantity", json!(quantity));
                    if let Some(kind) = kind {
                        push("channel_kind", json!(kind));
                    }
                    push("channel_types", json!(types));
                }
            }
            Self::ChannelLevels { quantity, levels } => {
                if *quantity > 0 {
                    push("channel_levels", json!(levels));
                }
            }
            Self::ChannelAck {
                channel,
                level,
                status,
            } => {
                if let Some(level) = level {
                    push(&format!("channel_{channel}_level"), json!(level));
                }
                if let Some(status) = status {
                    push(&format!("channel_{channel}_status"), json!(status));
                }
            }
            Self::Status(status) => push("status", json!(status)),
        }

        entries
    }
}

impl fmt::Display for DecodedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceName(name) => write!(f, "name={name:?}"),
            Self::UniqueId(id) => write!(f, "unique_id={id}"),
            Self::FirmwareVersion(version) => write!(f, "firmware={version:?}"),
            Self::SensorBlock(block) => {
                write!(f, "sensor states={:?}", block.states)?;
                if let (Some(t), Some(h)) = (block.temperature, block.humidity) {
                    write!(f, " temp={t} hum={h}")?;
                }
                Ok(())
            }
            Self::AcStatus(ac) => write!(
                f,
                "ac power={:?} mode={:?} temp={:?} fan={:?}",
                ac.power, ac.mode, ac.set_temperature, ac.fan
            ),
            Self::ChannelTypes {
                quantity, types, ..
            } => write!(f, "channel_types qty={quantity} {types:?}"),
            Self::ChannelLevels { quantity, levels } => {
                write!(f, "channel_levels qty={quantity} {levels:?}")
            }
            Self::ChannelAck { channel, level, .. } => {
                write!(f, "channel_ack ch={channel} level={level:?}")
            }
            Self::Status(status) => write!(f, "status=0x{status:02X}"),
            Self::Raw(raw) if raw.is_empty() => write!(f, "(no data)"),
            Self::Raw(raw) => write!(f, "raw {}", crate::packet::hex_dump(raw)),
        }
    }
}
