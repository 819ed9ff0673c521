//! Transports
//!
//! A transport moves raw frames over one physical medium. Each connected
//! transport runs a receive loop that decodes frames and hands them to a
//! [`FrameSink`]. Receive errors are logged and never end the loop.

mod framer;
mod rs485;
mod udp;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartcloud_protocol::{DecodedPayload, Frame, Packet, decode, hex_dump, interpret};
use tracing::{debug, trace};

use crate::error::TransportResult;

pub use framer::FrameAssembler;
pub use rs485::{Rs485Transport, SerialPortEntry, available_ports};
pub use udp::{UdpTransport, detect_local_ip, local_ipv4_towards};

/// Physical medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Rs485,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Rs485 => write!(f, "rs485"),
        }
    }
}

/// Where an outbound frame goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Configured broadcast address (UDP) or the shared bus (RS-485)
    Broadcast,
    /// A gateway on the configured port
    Unicast(Ipv4Addr),
    /// An explicit endpoint
    Socket(SocketAddr),
}

/// A frame received by a transport
#[derive(Debug, Clone)]
pub struct Inbound {
    pub frame: Frame,
    pub transport: TransportKind,
    /// Datagram sender, UDP only
    pub peer: Option<SocketAddr>,
    pub received_at: DateTime<Utc>,
}

impl Inbound {
    pub fn new(frame: Frame, transport: TransportKind, peer: Option<SocketAddr>) -> Self {
        Self {
            frame,
            transport,
            peer,
            received_at: Utc::now(),
        }
    }

    pub fn packet(&self) -> &Packet {
        &self.frame.packet
    }

    pub fn payload(&self) -> DecodedPayload {
        let packet = self.packet();
        interpret(packet.op_code(), packet.additional_data())
    }
}

/// Receives every decoded frame
pub type FrameSink = Arc<dyn Fn(Inbound) + Send + Sync>;

/// Capability interface shared by all media
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the medium and start the receive loop
    async fn connect(&self, sink: FrameSink) -> TransportResult<()>;

    /// Stop the receive loop and close handles. Idempotent.
    async fn disconnect(&self);

    async fn send(&self, frame: &[u8], destination: Destination) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    /// Send a discovery request to everyone on this medium
    async fn broadcast_discovery(&self, request: &Packet) -> TransportResult<()> {
        let frame = request.encode()?;
        self.send(&frame, Destination::Broadcast).await
    }
}

/// Decode one received buffer and pass it to the sink
pub(crate) fn deliver(
    buf: &[u8],
    transport: TransportKind,
    peer: Option<SocketAddr>,
    sink: &FrameSink,
) {
    trace!(%transport, bytes = %hex_dump(buf), "Received");

    match decode(buf) {
        Ok(frame) => sink(Inbound::new(frame, transport, peer)),
        Err(e) => debug!(%transport, ?peer, error = %e, "Discarding undecodable frame"),
    }
}
