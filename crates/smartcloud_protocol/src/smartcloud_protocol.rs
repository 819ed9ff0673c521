//! SMARTCLOUD wire protocol
//!
//! Pure codec layer with no I/O: frame encode/decode, the CRC16 checksum,
//! device addressing, opcode constants and payload interpretation.

pub mod crc;
pub mod device;
mod error;
pub mod opcode;
pub mod packet;
pub mod payload;

pub use device::{DeviceId, ParseDeviceIdError, model_name, model_name_or_hex};
pub use error::{DecodeError, EncodeError};
pub use opcode::{DISCOVERY_REQUESTS, DISCOVERY_RESPONSES, OpCode, is_discovery_response};
pub use packet::{Frame, MAX_DATA_LEN, MIN_FRAME_LEN, Packet, decode, encode, frame_len_for, hex_dump};
pub use payload::{AcStatus, DecodedPayload, SensorBlock, interpret};
