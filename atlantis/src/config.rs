use std::path::Path;

use atlantis_capture::BodyLimits;
use atlantis_transport::TransportConfig;
use serde::{Deserialize, Serialize};

use crate::error::AtlantisError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AtlantisConfig {
    /// Restricts discovery to peers whose name contains this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    pub should_capture_websocket_traffic: bool,
    pub is_enabled_transport_layer: bool,
    pub record_server_send_frames: bool,
    pub body_limits: BodyLimits,
    pub transport: TransportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_identifier: Option<String>,
}

impl Default for AtlantisConfig {
    fn default() -> Self {
        Self {
            host_name: None,
            should_capture_websocket_traffic: true,
            is_enabled_transport_layer: true,
            record_server_send_frames: false,
            body_limits: BodyLimits::default(),
            transport: TransportConfig::default(),
            device_name: None,
            project_name: None,
            bundle_identifier: None,
        }
    }
}

impl AtlantisConfig {
    pub fn load_or_default(path: &Path) -> Result<Self, AtlantisError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            Self::from_toml_str(&raw)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AtlantisError> {
        toml::from_str(raw).map_err(|err| AtlantisError::Config(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), AtlantisError> {
        let contents =
            toml::to_string_pretty(self).map_err(|err| AtlantisError::Config(err.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Transport settings with the host filter applied.
    pub fn transport_config(&self) -> TransportConfig {
        let mut transport = self.transport.clone();
        if self.host_name.is_some() {
            transport.host_name = self.host_name.clone();
        }
        transport
    }
}
