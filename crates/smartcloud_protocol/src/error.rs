use thiserror::Error;

/// Reasons a byte buffer is not a structurally valid frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame too short: {len} bytes (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("Bad separator: expected AA AA, found {0:02X} {1:02X}")]
    BadSeparator(u8, u8),

    #[error("Length field {0} is below the minimum of 11")]
    LengthTooSmall(u8),

    #[error("Length field {length} implies {expected} bytes, buffer has {actual}")]
    LengthMismatch {
        length: u8,
        expected: usize,
        actual: usize,
    },
}

/// Reasons a packet cannot be encoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Additional data too long: {len} bytes (maximum {max})")]
    PayloadTooLong { len: usize, max: usize },
}
