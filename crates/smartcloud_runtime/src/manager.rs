//! Communication Manager
//!
//! Owns the transports, the device registry and the handler table. Every
//! transport's receive loop feeds a shared [`Dispatcher`], which filters,
//! updates the registry and then invokes matching handlers outside any lock.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use smartcloud_protocol::{DISCOVERY_REQUESTS, DeviceId, OpCode, Packet, model_name_or_hex};
use tracing::{debug, info, trace, warn};

use crate::config::{CrcPolicy, Rs485Config, SmartcloudConfig, UdpConfig};
use crate::discovery::{DiscoveryReport, DiscoverySession, DiscoveryState};
use crate::error::{ManagerError, ManagerResult};
use crate::handlers::{Handler, HandlerId, HandlerTable, Route};
use crate::registry::{DeviceRegistry, Upsert};
use crate::transport::{
    Destination, FrameSink, Inbound, Rs485Transport, Transport, TransportKind, UdpTransport,
    detect_local_ip,
};

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Receive-side pipeline shared by all transports
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    handlers: Arc<HandlerTable>,
    own_id: DeviceId,
    crc_policy: CrcPolicy,
}

impl Dispatcher {
    pub fn dispatch(&self, inbound: Inbound) {
        let packet = inbound.packet();
        let source = packet.source_device();
        let op_code = packet.op_code();

        if source == self.own_id {
            trace!(%op_code, "Ignoring our own frame");
            return;
        }

        if !inbound.frame.crc_valid && self.crc_policy == CrcPolicy::Discard {
            debug!(device = %source, %op_code, crc = inbound.frame.crc, "Dropping frame with bad CRC");
            return;
        }

        match self.registry.upsert(&inbound) {
            Upsert::Created => info!(
                device = %source,
                model = %model_name_or_hex(packet.device_type()),
                transport = %inbound.transport,
                "New device"
            ),
            Upsert::Ignored => trace!(device = %source, %op_code, "Unaddressed sender, not registered"),
            Upsert::Updated => {}
        }

        let handlers = self.handlers.matching(op_code);
        debug!(device = %source, %op_code, handlers = handlers.len(), "Dispatched frame");
        for handler in handlers {
            handler(&inbound);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Communication Manager
// ─────────────────────────────────────────────────────────────────────────────

pub struct CommunicationManager {
    transports: Vec<Arc<dyn Transport>>,
    /// Index into `transports` of the preferred connected transport
    active: Mutex<Option<usize>>,
    registry: Arc<DeviceRegistry>,
    handlers: Arc<HandlerTable>,
    dispatcher: Arc<Dispatcher>,
    discovery_state: Mutex<DiscoveryState>,
    /// IP stamped into every outbound frame
    source_ip: Ipv4Addr,
    config: SmartcloudConfig,
}

impl CommunicationManager {
    /// Manager with no transports; add them with [`Self::with_transport`]
    pub fn new(config: SmartcloudConfig) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let handlers = Arc::new(HandlerTable::new());
        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::clone(&registry),
            handlers: Arc::clone(&handlers),
            own_id: config.identity.device_id(),
            crc_policy: config.registry.crc_policy,
        });

        Self {
            transports: Vec::new(),
            active: Mutex::new(None),
            registry,
            handlers,
            dispatcher,
            discovery_state: Mutex::new(DiscoveryState::Idle),
            source_ip: resolve_source_ip(&config),
            config,
        }
    }

    /// Manager with the transports the config enables
    pub fn from_config(config: SmartcloudConfig) -> Self {
        let udp: Option<UdpConfig> = config.udp.enabled.then(|| config.udp.clone());
        let rs485: Option<Rs485Config> = config.rs485.clone();

        let mut manager = Self::new(config);
        if let Some(udp) = udp {
            manager = manager.with_transport(Arc::new(UdpTransport::new(udp)));
        }
        if let Some(rs485) = rs485 {
            manager = manager.with_transport(Arc::new(Rs485Transport::new(rs485)));
        }
        manager
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn config(&self) -> &SmartcloudConfig {
        &self.config
    }

    pub fn source_ip(&self) -> Ipv4Addr {
        self.source_ip
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        *self.discovery_state.lock()
    }

    /// Sink handed to transports; every frame goes through the dispatcher
    pub fn sink(&self) -> FrameSink {
        let dispatcher = Arc::clone(&self.dispatcher);
        Arc::new(move |inbound| dispatcher.dispatch(inbound))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect every transport. The first success becomes active.
    ///
    /// Fails only when nothing could be connected.
    pub async fn connect_all(&self) -> ManagerResult<usize> {
        let mut connected = 0;

        for (index, transport) in self.transports.iter().enumerate() {
            match transport.connect(self.sink()).await {
                Ok(()) => {
                    connected += 1;
                    let mut active = self.active.lock();
                    if active.is_none() {
                        *active = Some(index);
                    }
                }
                Err(e) => warn!(transport = %transport.kind(), error = %e, "Transport failed to connect"),
            }
        }

        if connected == 0 {
            return Err(ManagerError::NoTransport);
        }

        info!(connected, total = self.transports.len(), "Communication manager started");
        Ok(connected)
    }

    /// Disconnect every transport
    pub async fn shutdown(&self) {
        futures::future::join_all(self.transports.iter().map(|t| t.disconnect())).await;
        *self.active.lock() = None;
        info!("Communication manager stopped");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn on<F>(&self, route: impl Into<Route>, handler: F) -> HandlerId
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.handlers.register(route, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.handlers.unregister(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one discovery round and report what the registry holds afterwards.
    ///
    /// The state stays `Done` until the next round starts.
    pub async fn discover(&self, timeout: Duration) -> ManagerResult<DiscoveryReport> {
        let connected = self.connected_transports();
        if connected.is_empty() {
            return Err(ManagerError::NoTransport);
        }

        let spacing = self.config.discovery.opcode_spacing();
        let mut session = DiscoverySession::start(self.registry.keys());
        info!(session = %session.id, ?timeout, "Discovery started");

        self.set_discovery_state(DiscoveryState::Broadcasting);
        for (i, op_code) in DISCOVERY_REQUESTS.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }

            let request = self.outbound(op_code);
            for transport in &connected {
                if let Err(e) = transport.broadcast_discovery(&request).await {
                    warn!(transport = %transport.kind(), %op_code, error = %e, "Discovery broadcast failed");
                }
            }
            session.record_sent(op_code);
            debug!(%op_code, "Discovery request sent");
        }

        self.set_discovery_state(DiscoveryState::Waiting);
        tokio::time::sleep(timeout).await;

        self.set_discovery_state(DiscoveryState::ExtendedWait);
        tokio::time::sleep(self.config.discovery.extended_wait()).await;

        self.set_discovery_state(DiscoveryState::Done);
        let report = session.finish(self.registry.snapshot());
        info!(
            session = %report.session_id,
            devices = report.devices.len(),
            new = report.new_devices.len(),
            "Discovery finished"
        );

        Ok(report)
    }

    fn set_discovery_state(&self, state: DiscoveryState) {
        *self.discovery_state.lock() = state;
        debug!(%state, "Discovery state");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a command to one device without waiting for a reply
    pub async fn send_to_device(
        &self,
        device_id: DeviceId,
        op_code: OpCode,
        payload: impl Into<Bytes>,
    ) -> ManagerResult<()> {
        let device = self.registry.get(device_id);
        let destination = device
            .as_ref()
            .and_then(|d| d.gateway_ip)
            .map(Destination::Unicast)
            .unwrap_or(Destination::Broadcast);
        let transport = self.pick_transport(device.map(|d| d.transport))?;

        let frame = self
            .outbound(op_code)
            .with_target(device_id)
            .with_data(payload)
            .encode()?;

        transport
            .send(&frame, destination)
            .await
            .map_err(|source| ManagerError::Send {
                device: device_id,
                source,
            })?;

        debug!(device = %device_id, %op_code, transport = %transport.kind(), ?destination, "Command sent");
        Ok(())
    }

    pub async fn query_firmware_version(&self, device_id: DeviceId) -> ManagerResult<()> {
        self.send_to_device(device_id, OpCode::FIRMWARE_QUERY, Bytes::new())
            .await
    }

    pub async fn query_channel_types(&self, device_id: DeviceId) -> ManagerResult<()> {
        self.send_to_device(device_id, OpCode::CHANNEL_TYPES, Bytes::new())
            .await
    }

    pub async fn query_channel_states(&self, device_id: DeviceId) -> ManagerResult<()> {
        self.send_to_device(device_id, OpCode::SENSOR_QUERY, Bytes::new())
            .await
    }

    pub async fn query_sensor(&self, device_id: DeviceId) -> ManagerResult<()> {
        self.send_to_device(device_id, OpCode::SENSOR_QUERY, Bytes::new())
            .await
    }

    /// Set one channel's level, clamped to 0..=100
    pub async fn set_channel(&self, device_id: DeviceId, channel: u8, level: u8) -> ManagerResult<()> {
        let payload = vec![channel, level.min(100), 0, 0];
        self.send_to_device(device_id, OpCode::SINGLE_CHANNEL_SET, payload)
            .await
    }

    /// Mark stale devices offline using the configured age
    pub fn sweep_offline(&self) -> usize {
        self.registry
            .sweep_offline(self.config.registry.offline_after())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn outbound(&self, op_code: OpCode) -> Packet {
        let identity = &self.config.identity;
        Packet::new(op_code)
            .with_source_ip(self.source_ip)
            .with_source(identity.device_id())
            .with_device_type(identity.device_type)
    }

    fn connected_transports(&self) -> Vec<Arc<dyn Transport>> {
        self.transports
            .iter()
            .filter(|t| t.is_connected())
            .cloned()
            .collect()
    }

    /// The device's own medium if connected, else the active one, else any
    fn pick_transport(&self, preferred: Option<TransportKind>) -> ManagerResult<Arc<dyn Transport>> {
        if let Some(kind) = preferred {
            if let Some(t) = self
                .transports
                .iter()
                .find(|t| t.kind() == kind && t.is_connected())
            {
                return Ok(Arc::clone(t));
            }
        }

        let active = *self.active.lock();
        if let Some(t) = active.and_then(|i| self.transports.get(i)) {
            if t.is_connected() {
                return Ok(Arc::clone(t));
            }
        }

        self.connected_transports()
            .into_iter()
            .next()
            .ok_or(ManagerError::NoTransport)
    }
}

/// Configured identity IP, else a concrete UDP bind address, else the
/// detected LAN address
fn resolve_source_ip(config: &SmartcloudConfig) -> Ipv4Addr {
    let configured = config.identity.source_ip;
    if !configured.is_unspecified() {
        return configured;
    }
    if config.udp.enabled && !config.udp.bind_ip.is_unspecified() {
        return config.udp.bind_ip;
    }

    match detect_local_ip() {
        Some(ip) => {
            debug!(%ip, "Detected local source IP");
            ip
        }
        None => {
            warn!("No route to detect the local IP; frames carry 0.0.0.0");
            configured
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::error::{TransportError, TransportResult};
    use async_trait::async_trait;
    use smartcloud_protocol::decode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Responder = Box<dyn Fn(&Packet) -> Vec<Packet> + Send + Sync>;

    /// In-memory transport that records sends and can answer discovery
    struct MockTransport {
        kind: TransportKind,
        fail_connect: bool,
        connected: AtomicBool,
        sink: Mutex<Option<FrameSink>>,
        sent: Mutex<Vec<(Bytes, Destination, Instant)>>,
        responder: Option<Responder>,
    }

    impl MockTransport {
        fn new(kind: TransportKind) -> Self {
            Self {
                kind,
                fail_connect: false,
                connected: AtomicBool::new(false),
                sink: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
                responder: None,
            }
        }

        fn failing(kind: TransportKind) -> Self {
            Self {
                fail_connect: true,
                ..Self::new(kind)
            }
        }

        fn responding(kind: TransportKind, responder: Responder) -> Self {
            Self {
                responder: Some(responder),
                ..Self::new(kind)
            }
        }

        /// Deliver a packet as if it arrived on the wire
        fn inject(&self, packet: Packet) {
            self.inject_bytes(&packet.encode().unwrap());
        }

        fn inject_bytes(&self, bytes: &[u8]) {
            let sink = self.sink.lock().clone();
            if let Some(sink) = sink {
                let peer = "192.168.1.40:6000".parse().ok();
                sink(Inbound::new(decode(bytes).unwrap(), self.kind, peer));
            }
        }

        fn sent(&self) -> Vec<(Packet, Destination, Instant)> {
            self.sent
                .lock()
                .iter()
                .map(|(b, d, t)| (decode(b).unwrap().packet, *d, *t))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn connect(&self, sink: FrameSink) -> TransportResult<()> {
            if self.fail_connect {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "port in use",
                )));
            }
            *self.sink.lock() = Some(sink);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.sink.lock().take();
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn send(&self, frame: &[u8], destination: Destination) -> TransportResult<()> {
            if !self.is_connected() {
                return Err(TransportError::NotConnected(self.kind));
            }
            self.sent
                .lock()
                .push((Bytes::copy_from_slice(frame), destination, Instant::now()));

            if let Some(responder) = &self.responder {
                let request = decode(frame).unwrap().packet;
                for reply in responder(&request) {
                    self.inject(reply);
                }
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    const LIGHT: DeviceId = DeviceId::new(1, 15);

    fn name_reply(name: &'static [u8]) -> Packet {
        Packet::new(OpCode::DISCOVERY_RESPONSE)
            .with_source(LIGHT)
            .with_device_type(0x0258)
            .with_target(DeviceId::CONTROLLER)
            .with_data(name)
    }

    async fn connected(mock: MockTransport) -> (CommunicationManager, Arc<MockTransport>) {
        let mock = Arc::new(mock);
        let manager = CommunicationManager::new(SmartcloudConfig::default())
            .with_transport(Arc::clone(&mock) as Arc<dyn Transport>);
        manager.connect_all().await.unwrap();
        (manager, mock)
    }

    #[tokio::test]
    async fn test_source_ip_resolution() {
        let mut config = SmartcloudConfig::default();
        config.identity.source_ip = Ipv4Addr::new(192, 168, 1, 10);
        config.udp.bind_ip = Ipv4Addr::new(192, 168, 1, 20);
        let mock = Arc::new(MockTransport::new(TransportKind::Udp));
        let manager = CommunicationManager::new(config.clone())
            .with_transport(Arc::clone(&mock) as Arc<dyn Transport>);
        manager.connect_all().await.unwrap();
        assert_eq!(manager.source_ip(), Ipv4Addr::new(192, 168, 1, 10));

        manager.query_sensor(LIGHT).await.unwrap();
        assert_eq!(mock.sent()[0].0.source_ip(), Ipv4Addr::new(192, 168, 1, 10));

        // A concrete bind address is the next best guess
        config.identity.source_ip = Ipv4Addr::UNSPECIFIED;
        let manager = CommunicationManager::new(config.clone());
        assert_eq!(manager.source_ip(), Ipv4Addr::new(192, 168, 1, 20));

        // Otherwise the detected address, which is never 0.0.0.0 when found
        config.udp.bind_ip = Ipv4Addr::UNSPECIFIED;
        let manager = CommunicationManager::new(config);
        if let Some(ip) = detect_local_ip() {
            assert_eq!(manager.source_ip(), ip);
        }
    }

    #[tokio::test]
    async fn test_connect_all_tolerates_failures() {
        let good = Arc::new(MockTransport::new(TransportKind::Rs485));
        let manager = CommunicationManager::new(SmartcloudConfig::default())
            .with_transport(Arc::new(MockTransport::failing(TransportKind::Udp)))
            .with_transport(Arc::clone(&good) as Arc<dyn Transport>);

        assert_eq!(manager.connect_all().await.unwrap(), 1);
        assert!(good.is_connected());

        manager.shutdown().await;
        assert!(!good.is_connected());
    }

    #[tokio::test]
    async fn test_connect_all_fails_when_nothing_connects() {
        let manager = CommunicationManager::new(SmartcloudConfig::default())
            .with_transport(Arc::new(MockTransport::failing(TransportKind::Udp)));

        assert!(matches!(
            manager.connect_all().await,
            Err(ManagerError::NoTransport)
        ));
        assert!(matches!(
            manager.discover(Duration::from_secs(1)).await,
            Err(ManagerError::NoTransport)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_updates_registry_and_handlers() {
        let (manager, mock) = connected(MockTransport::new(TransportKind::Udp)).await;

        let discovery_hits = Arc::new(AtomicUsize::new(0));
        let exact_hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&discovery_hits);
            manager.on(Route::DiscoveryResponse, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
            let hits = Arc::clone(&exact_hits);
            manager.on(OpCode::ALT_DISCOVERY_RESPONSE, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        mock.inject(name_reply(b"Hall"));
        mock.inject(
            Packet::new(OpCode::ALT_DISCOVERY_RESPONSE)
                .with_source(LIGHT)
                .with_data(vec![0u8]),
        );
        mock.inject(Packet::new(OpCode::FIRMWARE_RESPONSE).with_source(LIGHT));

        assert_eq!(discovery_hits.load(Ordering::SeqCst), 2);
        assert_eq!(exact_hits.load(Ordering::SeqCst), 1);

        let device = manager.registry().get(LIGHT).unwrap();
        assert_eq!(device.name.as_deref(), Some("Hall"));
        assert_eq!(device.opcodes_seen.len(), 3);
    }

    #[tokio::test]
    async fn test_own_echo_and_bad_crc_are_dropped() {
        let (manager, mock) = connected(MockTransport::new(TransportKind::Udp)).await;

        mock.inject(Packet::new(OpCode::DISCOVERY_REQUEST));
        assert!(manager.registry().is_empty());

        let mut bytes = name_reply(b"Hall").encode().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        mock.inject_bytes(&bytes);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unaddressed_sender_reaches_handlers_only() {
        let (manager, mock) = connected(MockTransport::new(TransportKind::Udp)).await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        manager.on(Route::Any, move |_: &Inbound| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mock.inject(
            Packet::new(OpCode::DISCOVERY_REQUEST).with_source(DeviceId::new(0, 0)),
        );
        mock.inject(
            Packet::new(OpCode::STATUS_RESPONSE)
                .with_source(DeviceId::BROADCAST)
                .with_data(vec![1u8]),
        );

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bad_crc_accepted_by_policy() {
        let mut config = SmartcloudConfig::default();
        config.registry.crc_policy = CrcPolicy::Accept;
        let mock = Arc::new(MockTransport::new(TransportKind::Udp));
        let manager = CommunicationManager::new(config)
            .with_transport(Arc::clone(&mock) as Arc<dyn Transport>);
        manager.connect_all().await.unwrap();

        let mut bytes = name_reply(b"Hall").encode().unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        mock.inject_bytes(&bytes);

        assert!(manager.registry().contains(LIGHT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timing_and_report() {
        let responder: Responder = Box::new(|request: &Packet| {
            if request.op_code() == OpCode::DISCOVERY_REQUEST {
                vec![name_reply(b""), name_reply(b"Hall Light")]
            } else {
                Vec::new()
            }
        });
        let (manager, mock) =
            connected(MockTransport::responding(TransportKind::Udp, responder)).await;

        assert_eq!(manager.discovery_state(), DiscoveryState::Idle);

        let started = Instant::now();
        let (report, ()) = tokio::join!(manager.discover(Duration::from_secs(5)), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert_eq!(manager.discovery_state(), DiscoveryState::Broadcasting);
            tokio::time::sleep(Duration::from_millis(2500)).await;
            assert_eq!(manager.discovery_state(), DiscoveryState::Waiting);
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert_eq!(manager.discovery_state(), DiscoveryState::ExtendedWait);
        });
        let report = report.unwrap();

        // 2 x 1s spacing + 5s timeout + 3s extended wait
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(manager.discovery_state(), DiscoveryState::Done);

        let sent = mock.sent();
        let ops: Vec<OpCode> = sent.iter().map(|(p, _, _)| p.op_code()).collect();
        assert_eq!(ops, DISCOVERY_REQUESTS.to_vec());
        assert!(sent.iter().all(|(p, d, _)| {
            *d == Destination::Broadcast && p.target_device() == DeviceId::BROADCAST
        }));
        assert_eq!(sent[1].2 - sent[0].2, Duration::from_secs(1));
        assert_eq!(sent[2].2 - sent[1].2, Duration::from_secs(1));

        assert_eq!(report.opcodes_sent, DISCOVERY_REQUESTS.to_vec());
        assert_eq!(report.new_devices, vec!["010F".to_string()]);
        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].name.as_deref(), Some("Hall Light"));

        // A second run finds nothing new
        let again = manager.discover(Duration::from_secs(1)).await.unwrap();
        assert!(again.new_devices.is_empty());
        assert_eq!(again.devices.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timings_from_config() {
        let mut config = SmartcloudConfig::default();
        config.discovery = DiscoveryConfig {
            timeout_secs: 5,
            opcode_spacing_ms: 10,
            extended_wait_ms: 20,
        };
        let manager = CommunicationManager::new(config)
            .with_transport(Arc::new(MockTransport::new(TransportKind::Udp)));
        manager.connect_all().await.unwrap();

        let started = Instant::now();
        let report = manager.discover(Duration::from_millis(100)).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(140));
        assert!(report.devices.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_device_routing() {
        let (manager, mock) = connected(MockTransport::new(TransportKind::Udp)).await;

        // Unknown device: broadcast
        manager.query_firmware_version(LIGHT).await.unwrap();

        // Known device: unicast to its gateway
        mock.inject(name_reply(b"Hall"));
        manager.set_channel(LIGHT, 3, 150).await.unwrap();

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);

        let (query, dest, _) = &sent[0];
        assert_eq!(*dest, Destination::Broadcast);
        assert_eq!(query.op_code(), OpCode::FIRMWARE_QUERY);
        assert_eq!(query.target_device(), LIGHT);
        assert_eq!(query.source_device(), DeviceId::CONTROLLER);

        let (set, dest, _) = &sent[1];
        assert_eq!(*dest, Destination::Unicast(Ipv4Addr::new(192, 168, 1, 40)));
        assert_eq!(set.op_code(), OpCode::SINGLE_CHANNEL_SET);
        assert_eq!(&set.additional_data()[..], &[3, 100, 0, 0]);
    }

    #[tokio::test]
    async fn test_send_prefers_device_transport() {
        let udp = Arc::new(MockTransport::new(TransportKind::Udp));
        let bus = Arc::new(MockTransport::new(TransportKind::Rs485));
        let manager = CommunicationManager::new(SmartcloudConfig::default())
            .with_transport(Arc::clone(&udp) as Arc<dyn Transport>)
            .with_transport(Arc::clone(&bus) as Arc<dyn Transport>);
        manager.connect_all().await.unwrap();

        bus.inject(name_reply(b"Hall"));
        manager.query_channel_types(LIGHT).await.unwrap();
        manager.query_sensor(DeviceId::new(9, 9)).await.unwrap();

        assert_eq!(bus.sent().len(), 1);
        assert_eq!(bus.sent()[0].0.op_code(), OpCode::CHANNEL_TYPES);
        assert_eq!(udp.sent().len(), 1);
        assert_eq!(udp.sent()[0].0.op_code(), OpCode::SENSOR_QUERY);
    }

    #[tokio::test]
    async fn test_send_without_transport_is_error() {
        let manager = CommunicationManager::new(SmartcloudConfig::default());
        let result = manager.query_channel_states(LIGHT).await;
        assert!(matches!(result, Err(ManagerError::NoTransport)));

        let (manager, _mock) = connected(MockTransport::new(TransportKind::Udp)).await;
        let too_long = vec![0u8; 300];
        assert!(matches!(
            manager.send_to_device(LIGHT, OpCode(0x1234), too_long).await,
            Err(ManagerError::Encode(_))
        ));
    }
}
