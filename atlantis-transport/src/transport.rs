use std::collections::HashMap;
use std::sync::Arc;

use atlantis_capture::{Message, MessageType};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::TransportConfig;
use crate::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionState, Outgoing, spawn_connection,
};
use crate::discovery::{DiscoveryEvent, ServiceBrowser, UdpBrowser, accepts_peer};
use crate::error::TransportError;
use crate::frame::encode_message;
use crate::pending::PendingQueue;

/// Outbound side used by the orchestrator. Calls never block on the network.
pub trait Transporter: Send + Sync {
    /// `identity` is written first on every connection that becomes ready.
    fn start(&self, config: TransportConfig, identity: Message);
    fn stop(&self);
    fn send(&self, message: Message);
}

pub type BrowserFactory = Box<dyn Fn(&TransportConfig) -> Box<dyn ServiceBrowser> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub peer_name: String,
    pub state: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct TransportSnapshot {
    pub running: bool,
    pub connections: Vec<ConnectionSnapshot>,
    pub pending: Vec<Arc<Message>>,
    pub evicted: u64,
}

impl TransportSnapshot {
    pub fn ready_connections(&self) -> usize {
        self.connections
            .iter()
            .filter(|connection| connection.state.is_ready())
            .count()
    }
}

enum Command {
    Start {
        config: TransportConfig,
        identity: Message,
    },
    Stop,
    Send(Message),
    Snapshot(oneshot::Sender<TransportSnapshot>),
}

/// Handle to the transport lane. Every clone talks to the same lane.
#[derive(Debug, Clone)]
pub struct FramedTransport {
    commands: mpsc::UnboundedSender<Command>,
}

impl FramedTransport {
    /// Spawns the lane on `handle`, browsing with [`UdpBrowser`].
    pub fn spawn(handle: &Handle) -> Self {
        Self::spawn_with_browser(
            handle,
            Box::new(|config: &TransportConfig| -> Box<dyn ServiceBrowser> {
                Box::new(UdpBrowser::from_config(config))
            }),
        )
    }

    pub fn spawn_with_browser(handle: &Handle, browser: BrowserFactory) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        handle.spawn(transport_loop(receiver, browser));
        Self { commands }
    }

    pub async fn snapshot(&self) -> Result<TransportSnapshot, TransportError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .map_err(|_| TransportError::Closed)?;
        answer.await.map_err(|_| TransportError::Closed)
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("transport lane is closed");
        }
    }
}

impl Transporter for FramedTransport {
    fn start(&self, config: TransportConfig, identity: Message) {
        self.post(Command::Start { config, identity });
    }

    fn stop(&self) {
        self.post(Command::Stop);
    }

    fn send(&self, message: Message) {
        self.post(Command::Send(message));
    }
}

fn outgoing(message: Message) -> Result<Outgoing, TransportError> {
    let frame = encode_message(&message)?;
    Ok(Outgoing {
        message: Arc::new(message),
        frame: Arc::from(frame),
    })
}

struct TransportLane {
    config: TransportConfig,
    running: bool,
    identity: Option<Outgoing>,
    browser_factory: BrowserFactory,
    browser_task: Option<JoinHandle<()>>,
    discovery: Option<mpsc::UnboundedReceiver<DiscoveryEvent>>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    pending: PendingQueue<Outgoing>,
}

async fn transport_loop(mut commands: mpsc::UnboundedReceiver<Command>, browser: BrowserFactory) {
    let (connection_events, mut connection_rx) = mpsc::unbounded_channel();
    let mut lane = TransportLane::new(browser, connection_events);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => lane.handle_command(command),
                None => break,
            },
            event = next_discovery(&mut lane.discovery) => match event {
                Some(event) => lane.handle_discovery(event),
                None => lane.discovery = None,
            },
            Some(event) = connection_rx.recv() => lane.handle_connection_event(event),
        }
    }
    lane.stop();
    debug!("transport lane stopped");
}

async fn next_discovery(
    discovery: &mut Option<mpsc::UnboundedReceiver<DiscoveryEvent>>,
) -> Option<DiscoveryEvent> {
    match discovery {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

impl TransportLane {
    fn new(
        browser_factory: BrowserFactory,
        connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let config = TransportConfig::default();
        Self {
            pending: PendingQueue::new(config.pending_capacity),
            config,
            running: false,
            identity: None,
            browser_factory,
            browser_task: None,
            discovery: None,
            connections: HashMap::new(),
            connection_events,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { config, identity } => self.start(config, identity),
            Command::Stop => self.stop(),
            Command::Send(message) => self.send(message),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn start(&mut self, config: TransportConfig, identity: Message) {
        if self.running {
            debug!("transport already running");
            return;
        }
        match outgoing(identity) {
            Ok(identity) => self.identity = Some(identity),
            Err(err) => {
                error!(%err, "failed to encode connection identity");
                return;
            }
        }
        self.pending.set_capacity(config.pending_capacity);
        self.config = config;

        let (events, discovery) = mpsc::unbounded_channel();
        let browser = (self.browser_factory)(&self.config);
        self.browser_task = Some(browser.spawn(events));
        self.discovery = Some(discovery);
        self.running = true;
        info!(
            service_type = %self.config.service_type,
            host_name = ?self.config.host_name,
            "transport started"
        );
    }

    fn stop(&mut self) {
        if let Some(task) = self.browser_task.take() {
            task.abort();
        }
        self.discovery = None;
        for (_, mut connection) in self.connections.drain() {
            connection.cancel();
        }
        self.pending.clear();
        self.identity = None;
        if self.running {
            info!("transport stopped");
        }
        self.running = false;
    }

    fn send(&mut self, message: Message) {
        let item = match outgoing(message) {
            Ok(item) => item,
            Err(err) => {
                error!(%err, "failed to encode message, dropping");
                return;
            }
        };

        let mut delivered = 0;
        let mut finished = Vec::new();
        for connection in self.connections.values() {
            if !connection.state().is_ready() {
                continue;
            }
            match connection.send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => finished.push(connection.id()),
            }
        }
        for id in finished {
            self.connection_lost(id);
        }
        if delivered == 0 {
            self.enqueue(item);
        } else {
            trace!(connections = delivered, "message broadcast");
        }
    }

    fn enqueue(&mut self, item: Outgoing) {
        if self.pending.push(item).is_some() {
            debug!(
                capacity = self.pending.capacity(),
                "pending queue full, dropped oldest message"
            );
        }
    }

    fn handle_discovery(&mut self, event: DiscoveryEvent) {
        if !self.running {
            return;
        }
        match event {
            DiscoveryEvent::Found(peer) => {
                if !accepts_peer(self.config.host_name.as_deref(), &peer.name) {
                    trace!(peer = %peer.name, "peer does not match host filter");
                    return;
                }
                if self
                    .connections
                    .values()
                    .any(|connection| connection.peer().name == peer.name)
                {
                    return;
                }
                info!(peer = %peer.name, addr = %peer.addr, "connecting to peer");
                let connection =
                    spawn_connection(peer, &self.config, self.connection_events.clone());
                self.connections.insert(connection.id(), connection);
            }
            DiscoveryEvent::Removed(name) => {
                self.connections.retain(|_, connection| {
                    if connection.peer().name != name {
                        return true;
                    }
                    info!(peer = %name, connection_id = %connection.id(), "peer removed");
                    connection.cancel();
                    false
                });
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { id, state } => {
                let Some(connection) = self.connections.get_mut(&id) else {
                    return;
                };
                connection.set_state(state.clone());
                match state {
                    ConnectionState::Ready => self.flush_ready(id),
                    ConnectionState::Waiting(reason) => {
                        debug!(connection_id = %id, %reason, "connection waiting");
                    }
                    ConnectionState::Failed(reason) => {
                        warn!(connection_id = %id, %reason, "connection failed");
                        self.connections.remove(&id);
                    }
                    ConnectionState::Cancelled => {
                        self.connections.remove(&id);
                    }
                    ConnectionState::Setup | ConnectionState::Preparing => {}
                }
            }
            ConnectionEvent::Requeue { id, message } => {
                if !self.running || message.message.message_type == MessageType::Connection {
                    return;
                }
                debug!(connection_id = %id, "requeueing message after reset");
                self.enqueue(message);
            }
        }
    }

    /// Identity first, then the backlog in submission order. Whatever the
    /// connection can no longer take stays pending.
    fn flush_ready(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get(&id) else {
            return;
        };
        if let Some(identity) = &self.identity {
            if connection.send(identity.clone()).is_err() {
                self.connection_lost(id);
                return;
            }
        }

        let mut flushed = 0;
        let mut unsent = Vec::new();
        for item in self.pending.drain() {
            if !unsent.is_empty() {
                unsent.push(item);
                continue;
            }
            match connection.send(item) {
                Ok(()) => flushed += 1,
                Err(item) => unsent.push(item),
            }
        }
        if unsent.is_empty() {
            debug!(connection_id = %id, flushed, "connection ready");
            return;
        }
        for item in unsent {
            self.pending.push(item);
        }
        self.connection_lost(id);
    }

    fn connection_lost(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            warn!(
                connection_id = %id,
                peer = %connection.peer().name,
                pending = self.pending.len(),
                "connection task finished, dropping connection"
            );
        }
    }

    fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            running: self.running,
            connections: self
                .connections
                .values()
                .map(|connection| ConnectionSnapshot {
                    peer_name: connection.peer().name.clone(),
                    state: connection.state().clone(),
                })
                .collect(),
            pending: self
                .pending
                .iter()
                .map(|item| Arc::clone(&item.message))
                .collect(),
            evicted: self.pending.evicted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use atlantis_capture::{Message, MessageType};
    use tokio::sync::mpsc;

    use super::TransportLane;
    use crate::config::TransportConfig;
    use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionState};
    use crate::discovery::{PeerService, ServiceBrowser, StaticBrowser};

    fn lane() -> (TransportLane, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let lane = TransportLane::new(
            Box::new(|_: &TransportConfig| -> Box<dyn ServiceBrowser> {
                Box::new(StaticBrowser::default())
            }),
            events,
        );
        (lane, receiver)
    }

    fn finished_connection(lane: &mut TransportLane, name: &str) -> crate::ConnectionId {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let connection = ConnectionHandle::finished(PeerService {
            name: name.to_string(),
            addr,
        });
        let id = connection.id();
        lane.connections.insert(id, connection);
        id
    }

    fn pending_ids(lane: &TransportLane) -> Vec<String> {
        lane.pending.iter().map(|item| item.message.id.clone()).collect()
    }

    fn state(lane: &mut TransportLane, id: crate::ConnectionId, state: ConnectionState) {
        lane.handle_connection_event(ConnectionEvent::StateChanged { id, state });
    }

    #[tokio::test]
    async fn ready_on_finished_connection_keeps_backlog() {
        let (mut lane, _events) = lane();
        lane.start(
            TransportConfig::default(),
            Message::new("identity", MessageType::Connection, None),
        );
        for n in 0..3 {
            lane.send(Message::new(format!("m{n}"), MessageType::Traffic, None));
        }

        let id = finished_connection(&mut lane, "Proxyman-Gone");
        state(&mut lane, id, ConnectionState::Preparing);
        state(&mut lane, id, ConnectionState::Ready);
        state(
            &mut lane,
            id,
            ConnectionState::Failed("peer closed connection".to_string()),
        );

        assert!(lane.connections.is_empty());
        assert_eq!(pending_ids(&lane), vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn broadcast_to_finished_connection_is_queued() {
        let (mut lane, _events) = lane();
        lane.start(
            TransportConfig::default(),
            Message::new("identity", MessageType::Connection, None),
        );
        let id = finished_connection(&mut lane, "Proxyman-Gone");
        if let Some(connection) = lane.connections.get_mut(&id) {
            connection.set_state(ConnectionState::Ready);
        }

        lane.send(Message::new("m0", MessageType::Traffic, None));

        assert!(lane.connections.is_empty());
        assert_eq!(pending_ids(&lane), vec!["m0"]);
    }

    #[tokio::test]
    async fn requeued_identity_is_not_kept() {
        let (mut lane, _events) = lane();
        lane.start(
            TransportConfig::default(),
            Message::new("identity", MessageType::Connection, None),
        );
        let id = finished_connection(&mut lane, "Proxyman-Gone");
        for (message_id, message_type) in [
            ("identity", MessageType::Connection),
            ("m0", MessageType::Traffic),
        ] {
            let message = super::outgoing(Message::new(message_id, message_type, None)).unwrap();
            lane.handle_connection_event(ConnectionEvent::Requeue { id, message });
        }
        assert_eq!(pending_ids(&lane), vec!["m0"]);
    }
}
