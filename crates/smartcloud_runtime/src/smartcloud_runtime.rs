//! SMARTCLOUD runtime
//!
//! Transports (UDP and RS-485), the live device registry, opcode dispatch and
//! the communication manager that runs discovery and sends commands.

pub mod config;
pub mod discovery;
mod error;
pub mod handlers;
pub mod manager;
pub mod registry;
pub mod transport;

pub use config::{
    CrcPolicy, DiscoveryConfig, EXTENDED_WAIT, IdentityConfig, OPCODE_SPACING, RegistryConfig,
    Rs485Config, SmartcloudConfig, UdpConfig,
};
pub use discovery::{DiscoveryReport, DiscoveryState};
pub use error::{ManagerError, ManagerResult, TransportError, TransportResult};
pub use handlers::{Handler, HandlerId, Route};
pub use manager::CommunicationManager;
pub use registry::{Device, DeviceRegistry, Upsert};
pub use transport::{
    Destination, FrameSink, Inbound, Rs485Transport, SerialPortEntry, Transport, TransportKind,
    UdpTransport, available_ports, detect_local_ip,
};
