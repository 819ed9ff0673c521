// Device Registry - Live map of every field device heard on the bus
//
// Devices are created on the first frame from an unknown id and merged on
// every later one. Nothing is ever removed automatically; "online" is derived
// from how recently a device was heard.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use smartcloud_protocol::{DecodedPayload, DeviceId, model_name_or_hex};

use crate::transport::{Inbound, TransportKind};

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

/// One field device as currently known
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub device_type: u16,
    pub model_name: String,
    pub gateway_ip: Option<Ipv4Addr>,
    pub transport: TransportKind,
    pub name: Option<String>,
    pub firmware_version: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    pub state: BTreeMap<String, Value>,
    pub opcodes_seen: BTreeSet<u16>,
}

impl Device {
    fn new(device_id: DeviceId, inbound: &Inbound) -> Self {
        let device_type = inbound.packet().device_type();
        Self {
            device_id,
            device_type,
            model_name: model_name_or_hex(device_type),
            gateway_ip: None,
            transport: inbound.transport,
            name: None,
            firmware_version: None,
            last_seen: inbound.received_at,
            online: true,
            state: BTreeMap::new(),
            opcodes_seen: BTreeSet::new(),
        }
    }

    /// External lookup key, e.g. `01FE`
    pub fn key(&self) -> String {
        self.device_id.key()
    }

    /// Name if known, else the model name
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.model_name)
    }

    fn merge(&mut self, inbound: &Inbound, payload: &DecodedPayload) {
        let packet = inbound.packet();

        self.touch(inbound.received_at);

        if packet.device_type() != self.device_type {
            self.device_type = packet.device_type();
            self.model_name = model_name_or_hex(self.device_type);
        }

        self.transport = inbound.transport;
        if let Some(ip) = gateway_ip(inbound) {
            self.gateway_ip = Some(ip);
        }

        self.opcodes_seen.insert(packet.op_code().value());
        merge_text(&mut self.name, payload.device_name());
        merge_text(&mut self.firmware_version, payload.firmware_version());
        self.state.extend(payload.state_entries());
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_seen = self.last_seen.max(at);
        self.online = true;
    }
}

/// Replace only with non-empty values
fn merge_text(field: &mut Option<String>, incoming: Option<&str>) {
    if let Some(value) = incoming.map(str::trim).filter(|v| !v.is_empty()) {
        *field = Some(value.to_string());
    }
}

/// Gateway address for UDP frames: the in-frame IP, else the datagram sender
fn gateway_ip(inbound: &Inbound) -> Option<Ipv4Addr> {
    if inbound.transport != TransportKind::Udp {
        return None;
    }

    let in_frame = inbound.packet().source_ip();
    if !in_frame.is_unspecified() {
        return Some(in_frame);
    }

    match inbound.peer.map(|p| p.ip()) {
        Some(IpAddr::V4(ip)) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Result of applying a frame to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
    /// Sender was `(0,0)` or the broadcast id
    Ignored,
}

/// Authoritative map of known devices
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, Device>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Merge a received frame into the device it came from
    pub fn upsert(&self, inbound: &Inbound) -> Upsert {
        let device_id = inbound.packet().source_device();
        if !device_id.is_addressable() {
            return Upsert::Ignored;
        }
        let payload = inbound.payload();

        let mut outcome = Upsert::Updated;
        let mut entry = self.devices.entry(device_id).or_insert_with(|| {
            outcome = Upsert::Created;
            Device::new(device_id, inbound)
        });
        entry.merge(inbound, &payload);

        outcome
    }

    pub fn get(&self, device_id: DeviceId) -> Option<Device> {
        self.devices.get(&device_id).map(|d| d.clone())
    }

    pub fn get_by_key(&self, key: &str) -> Option<Device> {
        DeviceId::from_key(key).and_then(|id| self.get(id))
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.devices.contains_key(&device_id)
    }

    /// Sorted keys of every known device
    pub fn keys(&self) -> Vec<String> {
        let mut ids: Vec<DeviceId> = self.devices.iter().map(|d| *d.key()).collect();
        ids.sort();
        ids.into_iter().map(|id| id.key()).collect()
    }

    /// Copy of every device, ordered by id
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by_key(|d| d.device_id);
        devices
    }

    pub fn devices_by_type(&self, device_type: u16) -> Vec<Device> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.device_type == device_type)
            .collect()
    }

    /// Mark devices not heard from within `max_age` as offline.
    ///
    /// Returns how many devices went offline.
    pub fn sweep_offline(&self, max_age: Duration) -> usize {
        self.sweep_offline_at(Utc::now(), max_age)
    }

    pub fn sweep_offline_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut changed = 0;

        for mut device in self.devices.iter_mut() {
            if device.online && now.signed_duration_since(device.last_seen) > max_age {
                device.online = false;
                changed += 1;
            }
        }

        changed
    }

    /// Forget a device. The registry never does this on its own.
    pub fn remove(&self, device_id: DeviceId) -> Option<Device> {
        self.devices.remove(&device_id).map(|(_, d)| d)
    }

    pub fn online_count(&self) -> usize {
        self.devices.iter().filter(|d| d.online).count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
