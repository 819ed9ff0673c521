//! Discovery session bookkeeping
//!
//! The protocol has no acknowledgment, so a discovery run is a fixed timing
//! policy: broadcast each request opcode with a spacing between them, wait the
//! caller timeout, then wait a little longer for slow name responses.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use smartcloud_protocol::OpCode;
use uuid::Uuid;

use crate::registry::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    Broadcasting,
    Waiting,
    ExtendedWait,
    Done,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Broadcasting => "broadcasting",
            Self::Waiting => "waiting",
            Self::ExtendedWait => "extended_wait",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// State of one `discover()` call
#[derive(Debug, Clone)]
pub struct DiscoverySession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Request opcodes with the time each was sent
    pub sent: Vec<(OpCode, DateTime<Utc>)>,
    /// Registry keys present when the session started
    known_before: HashSet<String>,
}

impl DiscoverySession {
    pub fn start(known_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            sent: Vec::new(),
            known_before: known_keys.into_iter().collect(),
        }
    }

    pub fn record_sent(&mut self, op: OpCode) {
        self.sent.push((op, Utc::now()));
    }

    /// Finish against the current registry contents
    pub fn finish(self, devices: Vec<Device>) -> DiscoveryReport {
        let new_devices = devices
            .iter()
            .map(Device::key)
            .filter(|key| !self.known_before.contains(key))
            .collect();

        DiscoveryReport {
            session_id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            opcodes_sent: self.sent.into_iter().map(|(op, _)| op).collect(),
            devices,
            new_devices,
        }
    }
}

/// Outcome of a discovery run. An empty result is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub opcodes_sent: Vec<OpCode>,
    /// Snapshot of the whole registry
    pub devices: Vec<Device>,
    /// Keys that were not known before this run
    pub new_devices: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run() {
        let mut session = DiscoverySession::start(vec!["010F".to_string()]);
        session.record_sent(OpCode::DISCOVERY_REQUEST);

        let report = session.finish(Vec::new());
        assert!(report.devices.is_empty());
        assert!(report.new_devices.is_empty());
        assert_eq!(report.opcodes_sent, vec![OpCode::DISCOVERY_REQUEST]);
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DiscoveryState::ExtendedWait.to_string(), "extended_wait");
    }
}
