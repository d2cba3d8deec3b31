use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, RwLock};

use atlantis_capture::{
    CapturedPackage, ConnectionPackage, CustomError, Device, Header, Message, PackageId,
    PackageRegistry, PackageRegistryConfig, PackageSink, Project, Request, Response,
    WebsocketPayload, spawn_package_registry,
};
use atlantis_transport::{FramedTransport, Transporter};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info};

use crate::capture::{CaptureEvent, CaptureEventSource, CaptureHandle, TaskKind};
use crate::config::AtlantisConfig;
use crate::delegate::{AtlantisDelegate, DelegateLane};
use crate::error::AtlantisError;

/// State read by the registry lane when a package is released.
pub(crate) struct Outbound {
    session_id: String,
    transport: Arc<dyn Transporter>,
    config: RwLock<AtlantisConfig>,
    running: AtomicBool,
    transport_enabled: AtomicBool,
    delegate: Mutex<Option<DelegateLane>>,
}

impl Outbound {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn captures_websocket(&self) -> bool {
        self.read_config().should_capture_websocket_traffic
    }

    pub(crate) fn read_config(&self) -> std::sync::RwLockReadGuard<'_, AtlantisConfig> {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_config(&self) -> std::sync::RwLockWriteGuard<'_, AtlantisConfig> {
        self.config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn delegate(&self) -> MutexGuard<'_, Option<DelegateLane>> {
        self.delegate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, package: CapturedPackage) {
        if let Some(lane) = self.delegate().as_ref() {
            lane.deliver(package.package().clone());
        }
        if !self.is_running() || !self.transport_enabled.load(Ordering::Acquire) {
            return;
        }

        let limits = self.read_config().body_limits;
        let message = match &package {
            CapturedPackage::Traffic(inner) => Message::traffic(&self.session_id, inner, &limits),
            CapturedPackage::WebSocket(inner) => {
                Message::websocket(&self.session_id, inner, &limits)
            }
        };
        match message {
            Ok(message) => self.transport.send(message),
            Err(err) => {
                error!(package_id = %package.package().id(), %err, "failed to encode package");
            }
        }
    }

    fn identity(&self, config: &AtlantisConfig) -> Result<Message, AtlantisError> {
        let mut device = Device::current();
        if let Some(name) = &config.device_name {
            device.name = name.clone();
        }
        let mut project = Project::current();
        if let Some(name) = &config.project_name {
            project.name = name.clone();
        }
        if let Some(bundle_identifier) = &config.bundle_identifier {
            project.bundle_identifier = bundle_identifier.clone();
        }
        let package = ConnectionPackage::new(device, project);
        Ok(Message::connection(&self.session_id, &package)?)
    }
}

struct Dispatcher {
    outbound: Arc<Outbound>,
}

impl PackageSink for Dispatcher {
    fn dispatch(&mut self, package: CapturedPackage) {
        self.outbound.publish(package);
    }
}

pub(crate) struct Shared {
    pub(crate) registry: PackageRegistry,
    pub(crate) outbound: Arc<Outbound>,
}

#[derive(Default)]
pub struct AtlantisBuilder {
    config: AtlantisConfig,
    transport: Option<Arc<dyn Transporter>>,
    source: Option<Box<dyn CaptureEventSource>>,
    runtime: Option<Handle>,
    session_id: Option<String>,
    registry: PackageRegistryConfig,
}

impl AtlantisBuilder {
    pub fn config(mut self, config: AtlantisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transporter>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn capture_source(mut self, source: Box<dyn CaptureEventSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Runs the transport lane on an existing runtime instead of a private one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn registry(mut self, registry: PackageRegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<Atlantis, AtlantisError> {
        let mut runtime = None;
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let handle = match self.runtime {
                    Some(handle) => handle,
                    None => {
                        let owned = tokio::runtime::Builder::new_multi_thread()
                            .worker_threads(1)
                            .thread_name("atlantis-transport")
                            .enable_all()
                            .build()
                            .map_err(|err| AtlantisError::Runtime(err.to_string()))?;
                        let handle = owned.handle().clone();
                        runtime = Some(owned);
                        handle
                    }
                };
                Arc::new(FramedTransport::spawn(&handle)) as Arc<dyn Transporter>
            }
        };

        let transport_enabled = self.config.is_enabled_transport_layer;
        let outbound = Arc::new(Outbound {
            session_id: self
                .session_id
                .unwrap_or_else(|| PackageId::new().to_string()),
            transport,
            config: RwLock::new(self.config),
            running: AtomicBool::new(false),
            transport_enabled: AtomicBool::new(transport_enabled),
            delegate: Mutex::new(None),
        });
        let registry = spawn_package_registry(
            Box::new(Dispatcher {
                outbound: Arc::clone(&outbound),
            }),
            self.registry,
        );

        Ok(Atlantis {
            shared: Arc::new(Shared { registry, outbound }),
            source: Mutex::new(self.source),
            install: Once::new(),
            runtime,
        })
    }
}

/// Wires capture events through the package registry to the transport.
pub struct Atlantis {
    pub(crate) shared: Arc<Shared>,
    source: Mutex<Option<Box<dyn CaptureEventSource>>>,
    install: Once,
    runtime: Option<Runtime>,
}

impl Atlantis {
    pub fn builder() -> AtlantisBuilder {
        AtlantisBuilder::default()
    }

    pub fn new(config: AtlantisConfig) -> Result<Self, AtlantisError> {
        Self::builder().config(config).build()
    }

    /// Enables capture and starts the transport. Calling it while running is a
    /// no-op.
    pub fn start(&self, host_name: Option<String>) -> Result<(), AtlantisError> {
        let outbound = &self.shared.outbound;
        if outbound.is_running() {
            debug!("atlantis already running");
            return Ok(());
        }
        if let Some(host_name) = host_name {
            outbound.write_config().host_name = Some(host_name);
        }
        let config = outbound.read_config().clone();
        let identity = outbound.identity(&config)?;

        self.install_capture(config.should_capture_websocket_traffic);
        if outbound
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        outbound
            .transport_enabled
            .store(config.is_enabled_transport_layer, Ordering::Release);
        if config.is_enabled_transport_layer {
            outbound.transport.start(config.transport_config(), identity);
        }
        info!(
            session_id = %outbound.session_id,
            host_name = ?config.host_name,
            transport = config.is_enabled_transport_layer,
            "atlantis started"
        );
        Ok(())
    }

    /// Stops the transport. Installed capture hooks stay in place but their
    /// events are dropped.
    pub fn stop(&self) {
        let outbound = &self.shared.outbound;
        if !outbound.running.swap(false, Ordering::AcqRel) {
            return;
        }
        outbound.transport.stop();
        info!(session_id = %outbound.session_id, "atlantis stopped");
    }

    pub fn set_enable_transport_layer(&self, enabled: bool) -> Result<(), AtlantisError> {
        let outbound = &self.shared.outbound;
        outbound.write_config().is_enabled_transport_layer = enabled;
        let previous = outbound.transport_enabled.swap(enabled, Ordering::AcqRel);
        if previous == enabled || !outbound.is_running() {
            return Ok(());
        }
        if enabled {
            let config = outbound.read_config().clone();
            let identity = outbound.identity(&config)?;
            outbound.transport.start(config.transport_config(), identity);
        } else {
            outbound.transport.stop();
        }
        Ok(())
    }

    pub fn set_delegate(&self, delegate: Arc<dyn AtlantisDelegate>) {
        *self.shared.outbound.delegate() = Some(DelegateLane::spawn(delegate));
    }

    pub fn clear_delegate(&self) {
        self.shared.outbound.delegate().take();
    }

    pub fn is_running(&self) -> bool {
        self.shared.outbound.is_running()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.outbound.session_id
    }

    pub fn config(&self) -> AtlantisConfig {
        self.shared.outbound.read_config().clone()
    }

    pub fn capture_handle(&self) -> CaptureHandle {
        CaptureHandle::new(Arc::clone(&self.shared))
    }

    pub fn registered_packages(&self) -> Result<usize, AtlantisError> {
        Ok(self.shared.registry.len()?)
    }

    /// Waits until every event reported so far has been processed.
    pub fn flush(&self) -> Result<(), AtlantisError> {
        Ok(self.shared.registry.flush()?)
    }

    pub fn on_start(&self, id: PackageId, kind: TaskKind, request: Request) {
        self.emit(CaptureEvent::Started { id, kind, request });
    }

    pub fn on_response_received(&self, id: PackageId, status_code: i64, headers: Vec<Header>) {
        self.emit(CaptureEvent::ResponseReceived {
            id,
            response: Response::new(status_code, headers),
            request: None,
        });
    }

    pub fn on_data_received(&self, id: PackageId, data: Vec<u8>) {
        self.emit(CaptureEvent::DataReceived { id, data });
    }

    pub fn on_upload_data_sent(&self, id: PackageId, data: Vec<u8>) {
        self.emit(CaptureEvent::UploadDataSent {
            id,
            data,
            request: None,
        });
    }

    pub fn on_completed(&self, id: PackageId, error: Option<CustomError>) {
        self.emit(CaptureEvent::Completed { id, error });
    }

    pub fn on_websocket_send(&self, id: PackageId, payload: WebsocketPayload) {
        self.emit(CaptureEvent::WebSocketSend { id, payload });
    }

    pub fn on_websocket_receive(&self, id: PackageId, payload: WebsocketPayload) {
        self.emit(CaptureEvent::WebSocketReceive { id, payload });
    }

    pub fn on_websocket_ping_pong(&self, id: PackageId) {
        self.emit(CaptureEvent::WebSocketPingPong { id });
    }

    pub fn on_websocket_closed(&self, id: PackageId, code: i64, reason: Option<String>) {
        self.emit(CaptureEvent::WebSocketClosed { id, code, reason });
    }

    fn emit(&self, event: CaptureEvent) {
        self.capture_handle().emit(event);
    }

    pub(crate) fn inject(&self, package: CapturedPackage) {
        if !self.is_running() {
            debug!(package_id = %package.package().id(), "not running, dropping manual package");
            return;
        }
        self.shared.registry.inject(package);
    }

    fn install_capture(&self, capture_websocket: bool) {
        self.install.call_once(|| {
            let mut source = self
                .source
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(source) = source.as_mut() {
                source.install(self.capture_handle(), capture_websocket);
                debug!(capture_websocket, "capture source installed");
            }
        });
    }
}

impl Drop for Atlantis {
    fn drop(&mut self) {
        self.clear_delegate();
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
