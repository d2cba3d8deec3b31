use std::sync::Arc;

use atlantis_capture::{
    CustomError, PackageId, PackageType, Request, Response, WebsocketMessageType,
    WebsocketPayload,
};
use tracing::{trace, warn};

use crate::orchestrator::Shared;

/// Decided once by the adapter when a task is first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Http,
    WebSocket,
}

impl From<TaskKind> for PackageType {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Http => PackageType::Http,
            TaskKind::WebSocket => PackageType::Websocket,
        }
    }
}

/// Lifecycle callbacks a capture adapter reports for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started {
        id: PackageId,
        kind: TaskKind,
        request: Request,
    },
    /// `request` lets the package be created if the start was missed.
    ResponseReceived {
        id: PackageId,
        response: Response,
        request: Option<Request>,
    },
    DataReceived {
        id: PackageId,
        data: Vec<u8>,
    },
    UploadDataSent {
        id: PackageId,
        data: Vec<u8>,
        request: Option<Request>,
    },
    Completed {
        id: PackageId,
        error: Option<CustomError>,
    },
    WebSocketSend {
        id: PackageId,
        payload: WebsocketPayload,
    },
    WebSocketReceive {
        id: PackageId,
        payload: WebsocketPayload,
    },
    WebSocketPingPong {
        id: PackageId,
    },
    WebSocketClosed {
        id: PackageId,
        code: i64,
        reason: Option<String>,
    },
}

/// Produces [`CaptureEvent`]s, e.g. a wrapper around the application's HTTP
/// client. Installed at most once per [`crate::Atlantis`].
pub trait CaptureEventSource: Send {
    fn install(&mut self, handle: CaptureHandle, capture_websocket: bool);
}

/// Entry point adapters use to report events. Cheap to clone and usable from
/// any thread.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.outbound.is_running()
    }

    /// Routes the event onto the package registry. Dropped while capture is
    /// stopped.
    pub fn emit(&self, event: CaptureEvent) {
        if !self.is_enabled() {
            trace!("capture disabled, dropping event");
            return;
        }
        let registry = &self.shared.registry;
        match event {
            CaptureEvent::Started { id, kind, request } => {
                if kind == TaskKind::WebSocket && !self.shared.outbound.captures_websocket() {
                    trace!(package_id = %id, "websocket capture disabled");
                    return;
                }
                if let Err(err) = registry.start(id, request, kind.into()) {
                    warn!(%err, "failed to register package");
                }
            }
            CaptureEvent::ResponseReceived {
                id,
                response,
                request,
            } => registry.response(id, response, request),
            CaptureEvent::DataReceived { id, data } => registry.data(id, data),
            CaptureEvent::UploadDataSent { id, data, request } => {
                registry.upload_data(id, data, request)
            }
            CaptureEvent::Completed { id, error } => registry.completed(id, error),
            CaptureEvent::WebSocketSend { id, payload } => {
                registry.websocket_frame(id, WebsocketMessageType::Send, Some(payload))
            }
            CaptureEvent::WebSocketReceive { id, payload } => {
                registry.websocket_frame(id, WebsocketMessageType::Receive, Some(payload))
            }
            CaptureEvent::WebSocketPingPong { id } => {
                registry.websocket_frame(id, WebsocketMessageType::PingPong, None)
            }
            CaptureEvent::WebSocketClosed { id, code, reason } => {
                registry.websocket_closed(id, code, reason)
            }
        }
    }
}
