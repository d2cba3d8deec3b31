use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVICE_TYPE: &str = "_Proxyman._tcp";
pub const DEFAULT_SERVICE_PORT: u16 = 10909;
pub const DEFAULT_DISCOVERY_PORT: u16 = 10910;
pub const DEFAULT_PENDING_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub service_type: String,
    pub service_port: u16,
    pub discovery_port: u16,
    /// Only peers whose advertised name contains this value are dialed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    pub peer_ttl_ms: u64,
    pub announce_interval_ms: u64,
    pub pending_capacity: usize,
    pub write_timeout_ms: u64,
    pub connect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub max_frame_bytes: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            service_port: DEFAULT_SERVICE_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            host_name: None,
            peer_ttl_ms: 10_000,
            announce_interval_ms: 2_000,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            write_timeout_ms: 60_000,
            connect_attempts: 3,
            reconnect_delay_ms: 500,
            max_frame_bytes: 100 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
