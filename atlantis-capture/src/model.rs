use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::CaptureError;
use crate::id::PackageId;

pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Written in place of a response body that exceeds [`BodyLimits::response_max_bytes`].
pub const LARGE_BODY_SENTINEL: &str = "<Skip Large Body>";

pub fn now_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: String,
    pub headers: Vec<Header>,
    #[serde(
        default,
        with = "atlantis_codec::base64_bytes_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(url: impl Into<String>, method: impl Into<String>, headers: Vec<Header>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Option<Vec<u8>>) -> Self {
        self.body = body;
        self
    }

    pub fn append_body(&mut self, data: &[u8]) {
        self.body.get_or_insert_with(Vec::new).extend_from_slice(data);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: i64,
    pub headers: Vec<Header>,
}

impl Response {
    pub fn new(status_code: i64, headers: Vec<Header>) -> Self {
        Self {
            status_code,
            headers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomError {
    pub code: i64,
    pub message: String,
}

impl CustomError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&std::io::Error> for CustomError {
    fn from(err: &std::io::Error) -> Self {
        Self {
            code: err.raw_os_error().map(i64::from).unwrap_or(-1),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Http,
    Websocket,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WebsocketMessageType {
    PingPong,
    Send,
    Receive,
    SendCloseMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebsocketPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl WebsocketPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.as_bytes().to_vec(),
            Self::Binary(data) => data.clone(),
        }
    }
}

/// One websocket frame; the owning connection is the [`TrafficPackage`] it is attached to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketMessagePackage {
    id: PackageId,
    created_at: f64,
    message_type: WebsocketMessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(
        default,
        with = "atlantis_codec::base64_bytes_option",
        skip_serializing_if = "Option::is_none"
    )]
    data_value: Option<Vec<u8>>,
}

impl WebsocketMessagePackage {
    pub fn new(
        id: PackageId,
        message_type: WebsocketMessageType,
        payload: Option<WebsocketPayload>,
    ) -> Self {
        let (string_value, data_value) = match payload {
            Some(WebsocketPayload::Text(text)) => (Some(text), None),
            Some(WebsocketPayload::Binary(data)) => (None, Some(data)),
            None => (None, None),
        };
        Self {
            id,
            created_at: now_timestamp(),
            message_type,
            string_value,
            data_value,
        }
    }

    pub fn close(id: PackageId, code: i64, reason: Option<&str>) -> Self {
        let text = match reason {
            Some(reason) if !reason.is_empty() => format!("Close code: {code}, reason: {reason}"),
            _ => format!("Close code: {code}"),
        };
        Self::new(
            id,
            WebsocketMessageType::SendCloseMessage,
            Some(WebsocketPayload::Text(text)),
        )
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn message_type(&self) -> WebsocketMessageType {
        self.message_type
    }

    pub fn payload(&self) -> Option<WebsocketPayload> {
        if let Some(text) = &self.string_value {
            return Some(WebsocketPayload::Text(text.clone()));
        }
        self.data_value.clone().map(WebsocketPayload::Binary)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BodyLimits {
    pub request_max_bytes: usize,
    pub response_max_bytes: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            request_max_bytes: DEFAULT_MAX_BODY_BYTES,
            response_max_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// The accumulating record of one request/response or one websocket connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPackage {
    id: PackageId,
    start_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_at: Option<f64>,
    request: Request,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<CustomError>,
    #[serde(default, with = "atlantis_codec::base64_bytes")]
    response_body_data: Vec<u8>,
    package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    websocket_message_package: Option<WebsocketMessagePackage>,
    #[serde(skip)]
    last_chunk: Option<Vec<u8>>,
}

impl TrafficPackage {
    pub fn new(id: PackageId, request: Request, package_type: PackageType) -> Self {
        Self {
            id,
            start_at: now_timestamp(),
            end_at: None,
            request,
            response: None,
            error: None,
            response_body_data: Vec::new(),
            package_type,
            websocket_message_package: None,
            last_chunk: None,
        }
    }

    /// Builds a package whose lifecycle happened outside the capture path.
    pub fn assembled(
        id: PackageId,
        request: Request,
        response: Option<Response>,
        body: Option<Vec<u8>>,
        package_type: PackageType,
    ) -> Self {
        let mut package = Self::new(id, request, package_type);
        package.response = response;
        package.response_body_data = body.unwrap_or_default();
        package
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn error(&self) -> Option<&CustomError> {
        self.error.as_ref()
    }

    pub fn response_body(&self) -> &[u8] {
        &self.response_body_data
    }

    pub fn package_type(&self) -> PackageType {
        self.package_type
    }

    pub fn start_at(&self) -> f64 {
        self.start_at
    }

    pub fn end_at(&self) -> Option<f64> {
        self.end_at
    }

    pub fn is_completed(&self) -> bool {
        self.end_at.is_some()
    }

    pub fn websocket_message(&self) -> Option<&WebsocketMessagePackage> {
        self.websocket_message_package.as_ref()
    }

    pub fn set_start_at(&mut self, start_at: f64) {
        self.start_at = start_at;
    }

    pub fn append_request_body(&mut self, data: &[u8]) -> bool {
        if self.is_completed() {
            return false;
        }
        self.request.append_body(data);
        true
    }

    /// Last write wins until the package completes.
    pub fn update_response(&mut self, response: Response) -> bool {
        if self.is_completed() {
            return false;
        }
        self.response = Some(response);
        true
    }

    /// Appends a response chunk. A chunk identical to the previous one is a
    /// double delivery and is ignored.
    pub fn append_response_data(&mut self, data: &[u8]) -> bool {
        if self.is_completed() {
            return false;
        }
        if self.last_chunk.as_deref() == Some(data) {
            return false;
        }
        self.response_body_data.extend_from_slice(data);
        self.last_chunk = Some(data.to_vec());
        true
    }

    /// Sets `endAt` exactly once; later calls are rejected.
    pub fn complete(&mut self, error: Option<CustomError>) -> bool {
        self.complete_at(now_timestamp(), error)
    }

    pub fn complete_at(&mut self, end_at: f64, error: Option<CustomError>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.end_at = Some(end_at);
        if self.error.is_none() {
            self.error = error;
        }
        self.last_chunk = None;
        true
    }

    pub fn set_websocket_message(&mut self, message: WebsocketMessagePackage) {
        self.websocket_message_package = Some(message);
    }

    /// Copy of the connection package carrying a single frame, ready to ship.
    pub fn websocket_snapshot(&self, message: WebsocketMessagePackage) -> TrafficPackage {
        TrafficPackage {
            id: self.id.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            request: self.request.clone(),
            response: self.response.clone(),
            error: self.error.clone(),
            response_body_data: self.response_body_data.clone(),
            package_type: self.package_type,
            websocket_message_package: Some(message),
            last_chunk: None,
        }
    }

    /// The package as it goes on the wire: oversized response bodies become the
    /// sentinel, oversized request bodies are dropped.
    pub fn capped(&self, limits: &BodyLimits) -> Cow<'_, TrafficPackage> {
        let response_oversized = self.response_body_data.len() > limits.response_max_bytes;
        let request_oversized = self
            .request
            .body
            .as_ref()
            .is_some_and(|body| body.len() > limits.request_max_bytes);
        if !response_oversized && !request_oversized {
            return Cow::Borrowed(self);
        }

        let request = Request {
            url: self.request.url.clone(),
            method: self.request.method.clone(),
            headers: self.request.headers.clone(),
            body: if request_oversized {
                None
            } else {
                self.request.body.clone()
            },
        };
        let response_body_data = if response_oversized {
            LARGE_BODY_SENTINEL.as_bytes().to_vec()
        } else {
            self.response_body_data.clone()
        };

        Cow::Owned(TrafficPackage {
            id: self.id.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            request,
            response: self.response.clone(),
            error: self.error.clone(),
            response_body_data,
            package_type: self.package_type,
            websocket_message_package: self.websocket_message_package.clone(),
            last_chunk: None,
        })
    }

    pub fn encode(&self, limits: &BodyLimits) -> Result<Vec<u8>, CaptureError> {
        serde_json::to_vec(self.capped(limits).as_ref())
            .map_err(|err| CaptureError::Encode(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CaptureError> {
        serde_json::from_slice(bytes).map_err(|err| CaptureError::Decode(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub model: String,
}

impl Device {
    pub fn current() -> Self {
        let name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "Unknown Device".to_string());
        let model = format!(
            "{name} ({} {})",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        Self { name, model }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub bundle_identifier: String,
}

impl Project {
    pub fn current() -> Self {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "Untitled".to_string());
        Self {
            name,
            bundle_identifier: "No bundle identifier".to_string(),
        }
    }
}

/// First message on every connection: who is sending the traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionPackage {
    pub device: Device,
    pub project: Project,
    #[serde(
        default,
        with = "atlantis_codec::base64_bytes_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<Vec<u8>>,
}

impl ConnectionPackage {
    pub fn new(device: Device, project: Project) -> Self {
        Self {
            device,
            project,
            icon: None,
        }
    }

    pub fn current() -> Self {
        Self::new(Device::current(), Project::current())
    }
}
