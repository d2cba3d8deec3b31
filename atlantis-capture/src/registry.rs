use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, trace};

use crate::CaptureError;
use crate::id::PackageId;
use crate::model::{
    CustomError, PackageType, Request, Response, TrafficPackage, WebsocketMessagePackage,
    WebsocketMessageType, WebsocketPayload,
};

#[derive(Debug, Clone)]
pub struct PackageRegistryConfig {
    pub max_queue_size: usize,
}

impl Default for PackageRegistryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
        }
    }
}

/// A package leaving the registry, ready to be enveloped and shipped.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedPackage {
    Traffic(TrafficPackage),
    WebSocket(TrafficPackage),
}

impl CapturedPackage {
    pub fn package(&self) -> &TrafficPackage {
        match self {
            Self::Traffic(package) | Self::WebSocket(package) => package,
        }
    }

    pub fn into_package(self) -> TrafficPackage {
        match self {
            Self::Traffic(package) | Self::WebSocket(package) => package,
        }
    }
}

/// Receives every package the registry releases. Called on the registry lane.
pub trait PackageSink: Send {
    fn dispatch(&mut self, package: CapturedPackage);
}

/// Handle to the serial lane that owns every in-flight package.
#[derive(Debug, Clone)]
pub struct PackageRegistry {
    sender: Sender<Command>,
}

#[derive(Debug)]
enum Command {
    Start {
        id: PackageId,
        request: Request,
        package_type: PackageType,
        reply: Sender<()>,
    },
    UploadData {
        id: PackageId,
        data: Vec<u8>,
        fallback: Option<Request>,
    },
    Response {
        id: PackageId,
        response: Response,
        fallback: Option<Request>,
    },
    Data {
        id: PackageId,
        data: Vec<u8>,
    },
    Completed {
        id: PackageId,
        error: Option<CustomError>,
    },
    WebSocketFrame {
        id: PackageId,
        message_type: WebsocketMessageType,
        payload: Option<WebsocketPayload>,
    },
    WebSocketClosed {
        id: PackageId,
        code: i64,
        reason: Option<String>,
    },
    Inject(CapturedPackage),
    Len(Sender<usize>),
    Contains(PackageId, Sender<bool>),
    Snapshot(PackageId, Sender<Option<TrafficPackage>>),
    Flush(Sender<()>),
}

pub fn spawn_package_registry(
    sink: Box<dyn PackageSink>,
    config: PackageRegistryConfig,
) -> PackageRegistry {
    let (sender, receiver) = bounded(config.max_queue_size);
    let lane = RegistryLane {
        packages: HashMap::new(),
        sink,
    };

    std::thread::spawn(move || lane_loop(receiver, lane));

    PackageRegistry { sender }
}

impl PackageRegistry {
    /// Creates the package if absent. Blocks until the lane has stored it so the
    /// caller may release the request data right after.
    pub fn start(
        &self,
        id: PackageId,
        request: Request,
        package_type: PackageType,
    ) -> Result<(), CaptureError> {
        let (reply, done) = bounded(1);
        self.sender
            .send(Command::Start {
                id,
                request,
                package_type,
                reply,
            })
            .map_err(|_| CaptureError::LaneClosed)?;
        done.recv().map_err(|_| CaptureError::LaneClosed)
    }

    pub fn upload_data(&self, id: PackageId, data: Vec<u8>, fallback: Option<Request>) {
        self.post(Command::UploadData { id, data, fallback });
    }

    pub fn response(&self, id: PackageId, response: Response, fallback: Option<Request>) {
        self.post(Command::Response {
            id,
            response,
            fallback,
        });
    }

    pub fn data(&self, id: PackageId, data: Vec<u8>) {
        self.post(Command::Data { id, data });
    }

    pub fn completed(&self, id: PackageId, error: Option<CustomError>) {
        self.post(Command::Completed { id, error });
    }

    pub fn websocket_frame(
        &self,
        id: PackageId,
        message_type: WebsocketMessageType,
        payload: Option<WebsocketPayload>,
    ) {
        self.post(Command::WebSocketFrame {
            id,
            message_type,
            payload,
        });
    }

    pub fn websocket_closed(&self, id: PackageId, code: i64, reason: Option<String>) {
        self.post(Command::WebSocketClosed { id, code, reason });
    }

    /// Hands a package built outside the lifecycle events to the sink, in order
    /// with everything else on the lane.
    pub fn inject(&self, package: CapturedPackage) {
        self.post(Command::Inject(package));
    }

    pub fn len(&self) -> Result<usize, CaptureError> {
        self.request(Command::Len)
    }

    pub fn is_empty(&self) -> Result<bool, CaptureError> {
        self.len().map(|len| len == 0)
    }

    pub fn contains(&self, id: &PackageId) -> Result<bool, CaptureError> {
        let id = id.clone();
        self.request(|reply| Command::Contains(id, reply))
    }

    pub fn snapshot(&self, id: &PackageId) -> Result<Option<TrafficPackage>, CaptureError> {
        let id = id.clone();
        self.request(|reply| Command::Snapshot(id, reply))
    }

    /// Returns once every command posted before it has been handled.
    pub fn flush(&self) -> Result<(), CaptureError> {
        self.request(Command::Flush)
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, CaptureError> {
        let (reply, answer) = bounded(1);
        self.sender
            .send(build(reply))
            .map_err(|_| CaptureError::LaneClosed)?;
        answer.recv().map_err(|_| CaptureError::LaneClosed)
    }

    /// Waits for room when the lane is behind; lifecycle events are never dropped.
    fn post(&self, command: Command) {
        if self.sender.send(command).is_err() {
            debug!("package registry lane is closed, dropping event");
        }
    }
}

struct Entry {
    package: TrafficPackage,
    queued_frames: Vec<WebsocketMessagePackage>,
}

struct RegistryLane {
    packages: HashMap<PackageId, Entry>,
    sink: Box<dyn PackageSink>,
}

fn lane_loop(receiver: Receiver<Command>, mut lane: RegistryLane) {
    while let Ok(command) = receiver.recv() {
        lane.handle(command);
    }
    debug!(
        abandoned = lane.packages.len(),
        "package registry lane stopped"
    );
}

impl RegistryLane {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                id,
                request,
                package_type,
                reply,
            } => {
                self.get_or_create(&id, || request, package_type);
                let _ = reply.send(());
            }
            Command::UploadData { id, data, fallback } => {
                let Some(entry) = self.lookup_or_create(&id, fallback) else {
                    return;
                };
                entry.package.append_request_body(&data);
            }
            Command::Response {
                id,
                response,
                fallback,
            } => {
                let Some(entry) = self.lookup_or_create(&id, fallback) else {
                    return;
                };
                if entry.package.update_response(response) {
                    self.flush_frames(&id);
                }
            }
            Command::Data { id, data } => {
                let Some(entry) = self.lookup(&id) else {
                    return;
                };
                if !entry.package.append_response_data(&data) {
                    trace!(package_id = %id, "ignored duplicate response chunk");
                }
            }
            Command::Completed { id, error } => self.complete(id, error),
            Command::WebSocketFrame {
                id,
                message_type,
                payload,
            } => {
                let message = WebsocketMessagePackage::new(id.clone(), message_type, payload);
                self.websocket_frame(&id, message);
            }
            Command::WebSocketClosed { id, code, reason } => {
                self.websocket_closed(id, code, reason.as_deref());
            }
            Command::Inject(mut package) => {
                let inner = match &mut package {
                    CapturedPackage::Traffic(inner) | CapturedPackage::WebSocket(inner) => inner,
                };
                if !inner.is_completed() {
                    inner.complete(None);
                }
                self.sink.dispatch(package);
            }
            Command::Len(reply) => {
                let _ = reply.send(self.packages.len());
            }
            Command::Contains(id, reply) => {
                let _ = reply.send(self.packages.contains_key(&id));
            }
            Command::Snapshot(id, reply) => {
                let _ = reply.send(self.packages.get(&id).map(|entry| entry.package.clone()));
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn get_or_create(
        &mut self,
        id: &PackageId,
        build: impl FnOnce() -> Request,
        package_type: PackageType,
    ) -> &mut Entry {
        self.packages.entry(id.clone()).or_insert_with(|| {
            debug!(package_id = %id, ?package_type, "package created");
            Entry {
                package: TrafficPackage::new(id.clone(), build(), package_type),
                queued_frames: Vec::new(),
            }
        })
    }

    fn lookup(&mut self, id: &PackageId) -> Option<&mut Entry> {
        let entry = self.packages.get_mut(id);
        if entry.is_none() {
            debug!(package_id = %id, "no package for event, dropping");
        }
        entry
    }

    fn lookup_or_create(
        &mut self,
        id: &PackageId,
        fallback: Option<Request>,
    ) -> Option<&mut Entry> {
        match fallback {
            Some(request) if !self.packages.contains_key(id) => {
                Some(self.get_or_create(id, || request, PackageType::Http))
            }
            _ => self.lookup(id),
        }
    }

    fn remove(&mut self, id: &PackageId) -> Option<Entry> {
        self.packages.remove(id)
    }

    fn complete(&mut self, id: PackageId, error: Option<CustomError>) {
        let Some(entry) = self.lookup(&id) else {
            return;
        };
        match entry.package.package_type() {
            PackageType::Http => {
                let Some(mut entry) = self.remove(&id) else {
                    return;
                };
                if entry.package.complete(error) {
                    debug!(package_id = %id, "http package completed");
                    self.sink.dispatch(CapturedPackage::Traffic(entry.package));
                }
            }
            PackageType::Websocket => {
                if !entry.package.complete(error) {
                    return;
                }
                let package = entry.package.clone();
                self.sink.dispatch(CapturedPackage::Traffic(package));
                self.flush_frames(&id);
            }
        }
    }

    fn websocket_frame(&mut self, id: &PackageId, message: WebsocketMessagePackage) {
        let Some(entry) = self.lookup(id) else {
            return;
        };
        entry.package.set_websocket_message(message.clone());
        if entry.package.response().is_some() {
            let snapshot = entry.package.websocket_snapshot(message);
            self.sink.dispatch(CapturedPackage::WebSocket(snapshot));
        } else {
            trace!(package_id = %id, "queued websocket frame until response");
            entry.queued_frames.push(message);
        }
    }

    fn websocket_closed(&mut self, id: PackageId, code: i64, reason: Option<&str>) {
        let Some(mut entry) = self.remove(&id) else {
            debug!(package_id = %id, "no package for websocket close, dropping");
            return;
        };
        for frame in entry.queued_frames.drain(..) {
            let snapshot = entry.package.websocket_snapshot(frame);
            self.sink.dispatch(CapturedPackage::WebSocket(snapshot));
        }
        let close = WebsocketMessagePackage::close(id.clone(), code, reason);
        entry.package.set_websocket_message(close.clone());
        let snapshot = entry.package.websocket_snapshot(close);
        self.sink.dispatch(CapturedPackage::WebSocket(snapshot));
        debug!(package_id = %id, code, "websocket package closed");
    }

    fn flush_frames(&mut self, id: &PackageId) {
        let Some(entry) = self.packages.get_mut(id) else {
            return;
        };
        if entry.package.response().is_none() || entry.queued_frames.is_empty() {
            return;
        }
        let frames: Vec<_> = entry.queued_frames.drain(..).collect();
        let snapshots: Vec<_> = frames
            .into_iter()
            .map(|frame| entry.package.websocket_snapshot(frame))
            .collect();
        for snapshot in snapshots {
            self.sink.dispatch(CapturedPackage::WebSocket(snapshot));
        }
    }
}
