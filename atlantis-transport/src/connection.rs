use std::fmt;
use std::io;
use std::sync::Arc;

use atlantis_capture::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::discovery::PeerService;

/// macOS/BSD `ENOTCONN`, reported by peers that dropped mid-write.
const NOT_CONNECTED_CODE: i32 = 57;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Setup,
    Preparing,
    Ready,
    Waiting(String),
    Failed(String),
    Cancelled,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}

/// An encoded message queued for a connection. The envelope is kept so a
/// write lost to a reset can be queued again.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub message: Arc<Message>,
    pub frame: Arc<[u8]>,
}

#[derive(Debug)]
pub enum ConnectionEvent {
    StateChanged {
        id: ConnectionId,
        state: ConnectionState,
    },
    Requeue {
        id: ConnectionId,
        message: Outgoing,
    },
}

#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: PeerService,
    state: ConnectionState,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &PeerService {
        &self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Hands the message back when the connection task has already finished.
    pub fn send(&self, message: Outgoing) -> Result<(), Outgoing> {
        self.outgoing.send(message).map_err(|err| err.0)
    }

    pub fn cancel(&mut self) {
        self.task.abort();
        self.state = ConnectionState::Cancelled;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn is_reset_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionAborted
    ) || err.raw_os_error() == Some(NOT_CONNECTED_CODE)
}

pub fn spawn_connection(
    peer: PeerService,
    config: &TransportConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> ConnectionHandle {
    let id = ConnectionId::new();
    let (outgoing, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_connection(
        id,
        peer.clone(),
        config.clone(),
        receiver,
        events,
    ));
    ConnectionHandle {
        id,
        peer,
        state: ConnectionState::Setup,
        outgoing,
        task,
    }
}

struct Notifier {
    id: ConnectionId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Notifier {
    fn state(&self, state: ConnectionState) {
        let _ = self.events.send(ConnectionEvent::StateChanged { id: self.id, state });
    }

    fn requeue(&self, message: Outgoing) {
        let _ = self.events.send(ConnectionEvent::Requeue { id: self.id, message });
    }
}

async fn run_connection(
    id: ConnectionId,
    peer: PeerService,
    config: TransportConfig,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let notifier = Notifier { id, events };
    notifier.state(ConnectionState::Preparing);

    let stream = match connect(&peer, &config, &notifier).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(connection_id = %id, peer = %peer.name, %err, "connection failed");
            notifier.state(ConnectionState::Failed(err.to_string()));
            return;
        }
    };
    info!(connection_id = %id, peer = %peer.name, addr = %peer.addr, "connection ready");
    notifier.state(ConnectionState::Ready);

    let (mut reader, mut writer) = stream.into_split();
    let mut probe = [0u8; 512];
    loop {
        tokio::select! {
            next = outgoing.recv() => {
                let Some(item) = next else {
                    notifier.state(ConnectionState::Cancelled);
                    return;
                };
                let written =
                    tokio::time::timeout(config.write_timeout(), writer.write_all(&item.frame)).await;
                match written {
                    Ok(Ok(())) => {
                        trace!(connection_id = %id, bytes = item.frame.len(), "frame written");
                    }
                    Ok(Err(err)) => {
                        warn!(connection_id = %id, %err, "write failed");
                        if is_reset_error(&err) {
                            notifier.requeue(item);
                        }
                        requeue_unsent(&mut outgoing, &notifier);
                        notifier.state(ConnectionState::Failed(err.to_string()));
                        return;
                    }
                    Err(_) => {
                        warn!(connection_id = %id, "write timed out");
                        requeue_unsent(&mut outgoing, &notifier);
                        notifier.state(ConnectionState::Failed("write timed out".to_string()));
                        return;
                    }
                }
            }
            read = reader.read(&mut probe) => {
                match read {
                    Ok(0) => {
                        debug!(connection_id = %id, "peer closed connection");
                        requeue_unsent(&mut outgoing, &notifier);
                        notifier.state(ConnectionState::Failed("peer closed connection".to_string()));
                        return;
                    }
                    Ok(len) => trace!(connection_id = %id, len, "ignoring inbound bytes"),
                    Err(err) => {
                        debug!(connection_id = %id, %err, "read failed");
                        requeue_unsent(&mut outgoing, &notifier);
                        notifier.state(ConnectionState::Failed(err.to_string()));
                        return;
                    }
                }
            }
        }
    }
}

/// Closes the queue so later sends bounce back to the lane, then returns
/// everything not yet written.
fn requeue_unsent(outgoing: &mut mpsc::UnboundedReceiver<Outgoing>, notifier: &Notifier) {
    outgoing.close();
    while let Ok(item) = outgoing.try_recv() {
        notifier.requeue(item);
    }
}

async fn connect(
    peer: &PeerService,
    config: &TransportConfig,
    notifier: &Notifier,
) -> io::Result<TcpStream> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match TcpStream::connect(peer.addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(peer = %peer.name, %err, "failed to disable nagle");
                }
                return Ok(stream);
            }
            Err(err) if attempt < attempts => {
                debug!(peer = %peer.name, attempt, %err, "connect attempt failed");
                notifier.state(ConnectionState::Waiting(err.to_string()));
                tokio::time::sleep(config.reconnect_delay()).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
impl ConnectionHandle {
    /// A handle whose task has already finished.
    pub(crate) fn finished(peer: PeerService) -> Self {
        let (outgoing, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        Self {
            id: ConnectionId::new(),
            peer,
            state: ConnectionState::Setup,
            outgoing,
            task: tokio::spawn(async {}),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use atlantis_capture::{Message, MessageType};
    use tokio::sync::mpsc;

    use super::{
        ConnectionEvent, ConnectionId, ConnectionState, Notifier, Outgoing, is_reset_error,
        requeue_unsent,
    };

    fn item(id: &str) -> Outgoing {
        Outgoing {
            message: Arc::new(Message::new(id, MessageType::Traffic, None)),
            frame: Arc::from(&b"frame"[..]),
        }
    }

    #[test]
    fn unsent_messages_are_requeued_in_order() {
        let (events, mut requeued) = mpsc::unbounded_channel();
        let notifier = Notifier {
            id: ConnectionId::new(),
            events,
        };
        let (sender, mut outgoing) = mpsc::unbounded_channel();
        sender.send(item("m0")).unwrap();
        sender.send(item("m1")).unwrap();

        requeue_unsent(&mut outgoing, &notifier);
        assert!(sender.send(item("late")).is_err());

        let mut ids = Vec::new();
        while let Ok(event) = requeued.try_recv() {
            assert_matches!(event, ConnectionEvent::Requeue { message, .. } => {
                ids.push(message.message.id.clone());
            });
        }
        assert_eq!(ids, vec!["m0", "m1"]);
    }

    #[test]
    fn reset_class_errors_are_detected() {
        assert!(is_reset_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_reset_error(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_reset_error(&io::Error::from_raw_os_error(57)));
        assert!(!is_reset_error(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn terminal_states() {
        assert!(ConnectionState::Failed("x".to_string()).is_terminal());
        assert!(ConnectionState::Cancelled.is_terminal());
        assert!(!ConnectionState::Waiting("x".to_string()).is_terminal());
        assert!(ConnectionState::Ready.is_ready());
    }
}
