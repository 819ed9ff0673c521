//! SMARTCLOUD frame codec
//!
//! Wire layout, multi-byte fields big-endian:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | Source IPv4 |
//! | 4 | 10 | `"SMARTCLOUD"` |
//! | 14 | 2 | `AA AA` |
//! | 16 | 1 | length = 11 + N, counts offset 16 through the CRC |
//! | 17 | 2 | Source device id |
//! | 19 | 2 | Device type |
//! | 21 | 2 | Op code |
//! | 23 | 2 | Target device id |
//! | 25 | N | Additional data |
//! | 25+N | 2 | CRC16 over offsets 16..25+N |

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::device::DeviceId;
use crate::error::{DecodeError, EncodeError};
use crate::opcode::OpCode;

pub const HEADER: &[u8; 10] = b"SMARTCLOUD";
pub const SEPARATOR: [u8; 2] = [0xAA, 0xAA];

/// Length field value of a frame with no additional data: the length byte,
/// four address fields and the CRC
pub const BASE_LENGTH: usize = 11;
/// Largest payload whose length still fits the one-byte length field
pub const MAX_DATA_LEN: usize = u8::MAX as usize - BASE_LENGTH;
/// Bytes before the length field
pub const PREAMBLE_LEN: usize = 16;
/// Smallest possible frame (empty payload)
pub const MIN_FRAME_LEN: usize = PREAMBLE_LEN + BASE_LENGTH;

const LENGTH_OFFSET: usize = 16;
const DATA_OFFSET: usize = 25;
const CRC_LEN: usize = 2;

/// Total frame size implied by a length field value
pub const fn frame_len_for(length: u8) -> usize {
    PREAMBLE_LEN + length as usize
}

/// Default device type used by controllers
pub const DEFAULT_DEVICE_TYPE: u16 = 0xFFFE;

// ─────────────────────────────────────────────────────────────────────────────
// Packet
// ─────────────────────────────────────────────────────────────────────────────

/// One wire frame, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    source_ip: Ipv4Addr,
    source_device: DeviceId,
    device_type: u16,
    op_code: OpCode,
    target_device: DeviceId,
    additional_data: Bytes,
}

impl Packet {
    /// Broadcast packet from the default controller address
    pub fn new(op_code: impl Into<OpCode>) -> Self {
        Self {
            source_ip: Ipv4Addr::UNSPECIFIED,
            source_device: DeviceId::CONTROLLER,
            device_type: DEFAULT_DEVICE_TYPE,
            op_code: op_code.into(),
            target_device: DeviceId::BROADCAST,
            additional_data: Bytes::new(),
        }
    }

    pub fn with_source_ip(mut self, ip: Ipv4Addr) -> Self {
        self.source_ip = ip;
        self
    }

    pub fn with_source(mut self, device: DeviceId) -> Self {
        self.source_device = device;
        self
    }

    pub fn with_device_type(mut self, device_type: u16) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_target(mut self, device: DeviceId) -> Self {
        self.target_device = device;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.additional_data = data.into();
        self
    }

    pub fn source_ip(&self) -> Ipv4Addr {
        self.source_ip
    }

    pub fn source_device(&self) -> DeviceId {
        self.source_device
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    pub fn target_device(&self) -> DeviceId {
        self.target_device
    }

    pub fn additional_data(&self) -> &Bytes {
        &self.additional_data
    }

    /// Value of the length field: `11 + additional_data.len()`
    pub fn length(&self) -> usize {
        BASE_LENGTH + self.additional_data.len()
    }

    /// Total encoded size in bytes
    pub fn frame_len(&self) -> usize {
        PREAMBLE_LEN + self.length()
    }

    /// Encode to wire bytes. The CRC is always recomputed.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.additional_data.len() > MAX_DATA_LEN {
            return Err(EncodeError::PayloadTooLong {
                len: self.additional_data.len(),
                max: MAX_DATA_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(self.frame_len());
        buf.put_slice(&self.source_ip.octets());
        buf.put_slice(HEADER);
        buf.put_slice(&SEPARATOR);
        buf.put_u8(self.length() as u8);
        buf.put_slice(&self.source_device.to_bytes());
        buf.put_u16(self.device_type);
        buf.put_u16(self.op_code.value());
        buf.put_slice(&self.target_device.to_bytes());
        buf.put_slice(&self.additional_data);

        let crc = crc16(&buf[LENGTH_OFFSET..]);
        buf.put_u16(crc);

        Ok(buf.freeze())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} type=0x{:04X} data={}B",
            self.op_code,
            self.source_device,
            self.target_device,
            self.device_type,
            self.additional_data.len()
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded packet plus wire-level diagnostics.
///
/// Frames with `crc_valid == false` are structurally sound but untrusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet: Packet,
    /// CRC carried in the trailer
    pub crc: u16,
    pub crc_valid: bool,
    /// Raw header bytes at offsets 4..14
    pub header: [u8; 10],
}

impl Frame {
    pub fn has_standard_header(&self) -> bool {
        &self.header == HEADER
    }

    pub fn header_text(&self) -> String {
        String::from_utf8_lossy(&self.header).into_owned()
    }
}

/// Encode a packet to wire bytes
pub fn encode(packet: &Packet) -> Result<Bytes, EncodeError> {
    packet.encode()
}

/// Decode one complete frame.
///
/// Structural problems fail; a CRC mismatch is reported on the frame.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort {
            len: buf.len(),
            min: MIN_FRAME_LEN,
        });
    }

    if buf[14..16] != SEPARATOR {
        return Err(DecodeError::BadSeparator(buf[14], buf[15]));
    }

    let length = buf[LENGTH_OFFSET];
    if (length as usize) < BASE_LENGTH {
        return Err(DecodeError::LengthTooSmall(length));
    }

    let expected = frame_len_for(length);
    if buf.len() != expected {
        return Err(DecodeError::LengthMismatch {
            length,
            expected,
            actual: buf.len(),
        });
    }

    let data_end = expected - CRC_LEN;
    let crc = u16::from_be_bytes([buf[data_end], buf[data_end + 1]]);
    let crc_valid = crc16(&buf[LENGTH_OFFSET..data_end]) == crc;

    let mut header = [0u8; 10];
    header.copy_from_slice(&buf[4..14]);

    let packet = Packet {
        source_ip: Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]),
        source_device: DeviceId::new(buf[17], buf[18]),
        device_type: u16::from_be_bytes([buf[19], buf[20]]),
        op_code: OpCode(u16::from_be_bytes([buf[21], buf[22]])),
        target_device: DeviceId::new(buf[23], buf[24]),
        additional_data: Bytes::copy_from_slice(&buf[DATA_OFFSET..data_end]),
    };

    Ok(Frame {
        packet,
        crc,
        crc_valid,
        header,
    })
}

/// Space-separated uppercase hex, for trace logs
pub fn hex_dump(buf: &[u8]) -> String {
    buf.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_vector() -> Packet {
        Packet::new(OpCode::DISCOVERY_REQUEST)
            .with_source_ip(Ipv4Addr::new(192, 168, 1, 100))
            .with_source(DeviceId::new(1, 254))
            .with_device_type(0xFFFF)
            .with_target(DeviceId::new(0, 0))
    }

    fn sample_with_data() -> Packet {
        Packet::new(OpCode::SINGLE_CHANNEL_SET)
            .with_source_ip(Ipv4Addr::new(10, 0, 0, 7))
            .with_source(DeviceId::new(1, 20))
            .with_device_type(0x0258)
            .with_target(DeviceId::new(1, 15))
            .with_data(vec![2u8, 75, 0, 0])
    }

    #[test]
    fn test_known_vector() {
        let encoded = known_vector().encode().unwrap();

        assert_eq!(encoded.len(), 27);
        assert_eq!(encoded.len(), MIN_FRAME_LEN);
        assert_eq!(encoded[16], 11);
        assert_eq!(&encoded[0..4], &[192, 168, 1, 100]);
        assert_eq!(&encoded[4..14], b"SMARTCLOUD");
        assert_eq!(&encoded[14..16], &[0xAA, 0xAA]);
        assert_eq!(
            &encoded[16..27],
            &[0x0B, 0x01, 0xFE, 0xFF, 0xFF, 0x00, 0x0E, 0x00, 0x00, 0x4B, 0x69]
        );
    }

    #[test]
    fn test_defaults() {
        let packet = Packet::new(OpCode::DISCOVERY_REQUEST);
        assert_eq!(packet.source_ip(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(packet.source_device(), DeviceId::new(0x01, 0xFE));
        assert_eq!(packet.device_type(), 0xFFFE);
        assert_eq!(packet.target_device(), DeviceId::BROADCAST);
        assert!(packet.additional_data().is_empty());
    }

    #[test]
    fn test_round_trip() {
        for packet in [known_vector(), sample_with_data()] {
            let encoded = packet.encode().unwrap();
            let frame = decode(&encoded).unwrap();

            assert!(frame.crc_valid);
            assert!(frame.has_standard_header());
            assert_eq!(frame.packet, packet);
            assert_eq!(frame.packet.length(), encoded[16] as usize);
            assert_eq!(encoded.len(), packet.frame_len());
        }

        for n in [1usize, 3, 8, 64] {
            let packet = Packet::new(OpCode::DISCOVERY_REQUEST).with_data(vec![7u8; n]);
            let encoded = packet.encode().unwrap();
            assert_eq!(encoded.len(), MIN_FRAME_LEN + n);
            assert_eq!(decode(&encoded).unwrap().packet, packet);
        }
    }

    #[test]
    fn test_max_payload() {
        let packet = Packet::new(OpCode(0x1234)).with_data(vec![0x5A; MAX_DATA_LEN]);
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[16], 255);
        assert_eq!(encoded.len(), frame_len_for(255));
        assert_eq!(encoded.len(), packet.frame_len());
        assert_eq!(decode(&encoded).unwrap().packet, packet);

        let too_long = Packet::new(OpCode(0x1234)).with_data(vec![0; MAX_DATA_LEN + 1]);
        assert_eq!(
            too_long.encode(),
            Err(EncodeError::PayloadTooLong {
                len: MAX_DATA_LEN + 1,
                max: MAX_DATA_LEN
            })
        );
    }

    #[test]
    fn test_tamper_detection() {
        let encoded = sample_with_data().encode().unwrap();
        let crc_start = encoded.len() - 2;

        for offset in 17..crc_start {
            for bit in 0..8 {
                let mut tampered = encoded.to_vec();
                tampered[offset] ^= 1 << bit;
                let frame = decode(&tampered).unwrap();
                assert!(!frame.crc_valid, "flip at {offset}:{bit} went undetected");
            }
        }
    }

    #[test]
    fn test_crc_outside_domain() {
        // IP and header bytes are not covered by the checksum
        let mut encoded = sample_with_data().encode().unwrap().to_vec();
        encoded[0] ^= 0xFF;
        encoded[5] = b'X';

        let frame = decode(&encoded).unwrap();
        assert!(frame.crc_valid);
        assert!(!frame.has_standard_header());
        assert_eq!(frame.header_text(), "SXARTCLOUD");
    }

    #[test]
    fn test_length_field_tracks_payload() {
        let encoded = sample_with_data().encode().unwrap();

        for length in 0..=255u8 {
            let mut buf = encoded.to_vec();
            buf[16] = length;
            let result = decode(&buf);
            if length as usize == buf.len() - 16 {
                assert!(result.is_ok());
            } else {
                assert!(result.is_err(), "length {length} accepted");
            }
        }

        let mut buf = encoded.to_vec();
        buf[16] = 5;
        assert_eq!(decode(&buf), Err(DecodeError::LengthTooSmall(5)));

        let mut buf = encoded.to_vec();
        buf.push(0);
        assert!(matches!(
            decode(&buf),
            Err(DecodeError::LengthMismatch { actual: 32, .. })
        ));
    }

    #[test]
    fn test_minimum_size() {
        let encoded = known_vector().encode().unwrap();
        for len in 0..MIN_FRAME_LEN {
            assert_eq!(
                decode(&encoded[..len]),
                Err(DecodeError::TooShort {
                    len,
                    min: MIN_FRAME_LEN
                })
            );
        }

        // Garbage that is too short must not be inspected at all
        assert!(matches!(decode(&[0u8; 26]), Err(DecodeError::TooShort { .. })));
    }

    #[test]
    fn test_bad_separator() {
        let mut buf = known_vector().encode().unwrap().to_vec();
        buf[15] = 0xAB;
        assert_eq!(decode(&buf), Err(DecodeError::BadSeparator(0xAA, 0xAB)));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x00, 0xAA, 0x0F]), "00 AA 0F");
        assert_eq!(hex_dump(&[]), "");
    }
}
