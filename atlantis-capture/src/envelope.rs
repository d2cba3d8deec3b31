use serde::{Deserialize, Serialize};

use crate::CaptureError;
use crate::model::{BodyLimits, ConnectionPackage, TrafficPackage};

pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Connection,
    Traffic,
    Websocket,
    #[serde(other)]
    Unknown,
}

/// Outer wire wrapper. `content` holds the serialized inner package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    #[serde(
        default,
        with = "atlantis_codec::base64_bytes_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_version: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, message_type: MessageType, content: Option<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            message_type,
            content,
            build_version: Some(BUILD_VERSION.to_string()),
        }
    }

    pub fn connection(session_id: &str, package: &ConnectionPackage) -> Result<Self, CaptureError> {
        let content =
            serde_json::to_vec(package).map_err(|err| CaptureError::Encode(err.to_string()))?;
        Ok(Self::new(session_id, MessageType::Connection, Some(content)))
    }

    pub fn traffic(
        session_id: &str,
        package: &TrafficPackage,
        limits: &BodyLimits,
    ) -> Result<Self, CaptureError> {
        let content = package.encode(limits)?;
        Ok(Self::new(session_id, MessageType::Traffic, Some(content)))
    }

    pub fn websocket(
        session_id: &str,
        package: &TrafficPackage,
        limits: &BodyLimits,
    ) -> Result<Self, CaptureError> {
        let content = package.encode(limits)?;
        Ok(Self::new(session_id, MessageType::Websocket, Some(content)))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CaptureError> {
        serde_json::to_vec(self).map_err(|err| CaptureError::Encode(err.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CaptureError> {
        serde_json::from_slice(bytes).map_err(|err| CaptureError::Decode(err.to_string()))
    }

    pub fn decode_traffic(&self) -> Result<TrafficPackage, CaptureError> {
        TrafficPackage::decode(self.content_bytes()?)
    }

    pub fn decode_connection(&self) -> Result<ConnectionPackage, CaptureError> {
        serde_json::from_slice(self.content_bytes()?)
            .map_err(|err| CaptureError::Decode(err.to_string()))
    }

    fn content_bytes(&self) -> Result<&[u8], CaptureError> {
        self.content
            .as_deref()
            .ok_or_else(|| CaptureError::Decode("message has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{BUILD_VERSION, Message, MessageType};
    use crate::CaptureError;
    use crate::id::PackageId;
    use crate::model::{
        BodyLimits, ConnectionPackage, Device, PackageType, Project, Request, TrafficPackage,
    };

    #[test]
    fn traffic_envelope_round_trips_package() {
        let package = TrafficPackage::new(
            PackageId::from("r1"),
            Request::new("https://example.com/get", "GET", Vec::new()),
            PackageType::Http,
        );
        let message = Message::traffic("session", &package, &BodyLimits::default()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["id"], "session");
        assert_eq!(json["messageType"], "traffic");
        assert_eq!(json["buildVersion"], BUILD_VERSION);
        assert!(json["content"].is_string());

        let decoded = Message::from_json(&message.to_json().unwrap()).unwrap();
        let traffic = decoded.decode_traffic().unwrap();
        assert_eq!(traffic.request().url, "https://example.com/get");
    }

    #[test]
    fn connection_envelope_decodes() {
        let package = ConnectionPackage::new(
            Device {
                name: "box".to_string(),
                model: "linux".to_string(),
            },
            Project {
                name: "demo".to_string(),
                bundle_identifier: "com.example.demo".to_string(),
            },
        );
        let message = Message::connection("session", &package).unwrap();
        assert_eq!(message.message_type, MessageType::Connection);
        assert_eq!(message.decode_connection().unwrap(), package);
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let message =
            Message::from_json(br#"{"id":"x","messageType":"telemetry"}"#).unwrap();
        assert_eq!(message.message_type, MessageType::Unknown);
        assert!(message.build_version.is_none());
        assert_matches!(message.decode_traffic(), Err(CaptureError::Decode(_)));
    }
}
