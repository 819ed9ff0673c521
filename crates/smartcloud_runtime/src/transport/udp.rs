//! UDP broadcast transport

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Destination, FrameSink, Transport, TransportKind, deliver};
use crate::config::UdpConfig;
use crate::error::{TransportError, TransportResult};

/// Largest datagram we expect; frames top out at 271 bytes
const RECV_BUFFER: usize = 2048;
/// Pause after a receive error so a broken socket does not spin
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct UdpSession {
    socket: Arc<UdpSocket>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

pub struct UdpTransport {
    config: UdpConfig,
    session: Mutex<Option<UdpSession>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// Bound address while connected
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session
            .lock()
            .as_ref()
            .and_then(|s| s.socket.local_addr().ok())
    }

    fn resolve(&self, destination: Destination) -> SocketAddr {
        match destination {
            Destination::Broadcast => {
                SocketAddrV4::new(self.config.broadcast, self.config.port).into()
            }
            Destination::Unicast(ip) => SocketAddrV4::new(ip, self.config.port).into(),
            Destination::Socket(addr) => addr,
        }
    }
}

/// Public address used only to pick the outbound route
const ROUTE_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80);

/// Local IPv4 address the host would use to reach `target`.
///
/// Connecting a datagram socket selects a route without sending anything.
pub fn local_ipv4_towards(target: SocketAddrV4) -> Option<Ipv4Addr> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).ok()?;
    socket.connect(&SocketAddr::from(target).into()).ok()?;
    let local = socket.local_addr().ok()?.as_socket_ipv4()?;
    let ip = *local.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// LAN address of this host, if it has a route out
pub fn detect_local_ip() -> Option<Ipv4Addr> {
    local_ipv4_towards(ROUTE_TARGET)
}

/// Bind a broadcast-capable, address-reusing socket
fn bind_socket(addr: SocketAddr) -> TransportResult<UdpSocket> {
    let bind_err = |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_broadcast(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    sink: FrameSink,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("UDP receive loop stopping");
                break;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => deliver(&buf[..len], TransportKind::Udp, Some(peer), &sink),
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn connect(&self, sink: FrameSink) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let addr: SocketAddr = SocketAddrV4::new(self.config.bind_ip, self.config.port).into();
        let socket = Arc::new(bind_socket(addr)?);
        let local = socket.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(receive_loop(Arc::clone(&socket), sink, shutdown_rx));

        *self.session.lock() = Some(UdpSession {
            socket,
            shutdown_tx,
            task,
        });

        info!(%local, broadcast = %self.config.broadcast, "UDP transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        let _ = session.shutdown_tx.send(());
        if let Err(e) = session.task.await {
            warn!(error = %e, "UDP receive task ended abnormally");
        }
        info!("UDP transport disconnected");
    }

    async fn send(&self, frame: &[u8], destination: Destination) -> TransportResult<()> {
        let socket = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.socket))
            .ok_or(TransportError::NotConnected(TransportKind::Udp))?;

        let target = self.resolve(destination);
        socket.send_to(frame, target).await?;
        debug!(%target, bytes = frame.len(), "UDP frame sent");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_destinations() {
        let transport = UdpTransport::new(UdpConfig {
            broadcast: Ipv4Addr::new(192, 168, 1, 255),
            ..UdpConfig::default()
        });

        assert_eq!(
            transport.resolve(Destination::Broadcast),
            "192.168.1.255:6000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            transport.resolve(Destination::Unicast(Ipv4Addr::new(10, 0, 0, 2))),
            "10.0.0.2:6000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_local_ip_towards_loopback() {
        let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6000);
        assert_eq!(local_ipv4_towards(target), Some(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let transport = UdpTransport::new(UdpConfig::default());
        assert!(!transport.is_connected());

        let err = transport.send(&[0u8; 27], Destination::Broadcast).await;
        assert!(matches!(
            err,
            Err(TransportError::NotConnected(TransportKind::Udp))
        ));

        // Disconnecting an idle transport is a no-op
        transport.disconnect().await;
    }
}
