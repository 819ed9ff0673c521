use std::net::SocketAddr;

use smartcloud_protocol::{DeviceId, EncodeError};
use thiserror::Error;

use crate::transport::TransportKind;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port {path}: {source}")]
    Serial {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Listing serial ports failed: {0}")]
    PortScan(#[source] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} transport is not connected")]
    NotConnected(TransportKind),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Communication manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("No connected transport")]
    NoTransport,

    #[error("Sending to {device} failed: {source}")]
    Send {
        device: DeviceId,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;
