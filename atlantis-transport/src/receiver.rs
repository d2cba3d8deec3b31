use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use atlantis_capture::{ConnectionPackage, Message, MessageType, TrafficPackage};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::discovery::UdpAdvertiser;
use crate::error::TransportError;
use crate::frame::{FrameParser, FrameStatus, decode_payload};

/// A decoded envelope as seen by the listening peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    Connection {
        id: String,
        package: ConnectionPackage,
    },
    Traffic {
        id: String,
        package: TrafficPackage,
    },
    WebSocket {
        id: String,
        package: TrafficPackage,
    },
    Unknown {
        id: String,
    },
}

impl ReceivedMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Connection { id, .. }
            | Self::Traffic { id, .. }
            | Self::WebSocket { id, .. }
            | Self::Unknown { id } => id,
        }
    }

    pub fn from_message(message: &Message) -> Result<Self, TransportError> {
        let id = message.id.clone();
        Ok(match message.message_type {
            MessageType::Connection => Self::Connection {
                id,
                package: message.decode_connection()?,
            },
            MessageType::Traffic => Self::Traffic {
                id,
                package: message.decode_traffic()?,
            },
            MessageType::Websocket => Self::WebSocket {
                id,
                package: message.decode_traffic()?,
            },
            MessageType::Unknown => Self::Unknown { id },
        })
    }
}

pub type ReceivedMessages = ReceiverStream<ReceivedMessage>;

type ConnectionTable = Arc<Mutex<HashMap<String, ConnectionPackage>>>;

/// Listening peer: accepts framed connections and decodes what arrives.
#[derive(Debug)]
pub struct Receiver {
    local_addr: SocketAddr,
    config: TransportConfig,
    connections: ConnectionTable,
    accept_task: JoinHandle<()>,
    advertiser: Option<UdpAdvertiser>,
}

impl Receiver {
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, ReceivedMessages), TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (sender, receiver) = mpsc::channel(1024);
        let connections: ConnectionTable = Arc::default();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            config.max_frame_bytes,
            sender,
            Arc::clone(&connections),
        ));
        info!(addr = %local_addr, "receiver listening");
        Ok((
            Self {
                local_addr,
                config,
                connections,
                accept_task,
                advertiser: None,
            },
            ReceiverStream::new(receiver),
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Device and project metadata announced under a session id.
    pub fn connection(&self, id: &str) -> Option<ConnectionPackage> {
        self.lock_connections().get(id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.lock_connections().len()
    }

    /// Starts announcing this receiver as `name` towards `target`.
    pub async fn advertise(&mut self, name: String, target: SocketAddr) -> Result<(), TransportError> {
        if let Some(previous) = self.advertiser.take() {
            previous.stop().await;
        }
        let advertiser =
            UdpAdvertiser::spawn(&self.config, name, self.local_addr.port(), target).await?;
        self.advertiser = Some(advertiser);
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.stop().await;
        }
        self.accept_task.abort();
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionPackage>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Compares dotted numeric versions; missing versions are unsupported.
pub fn is_supported_version(build_version: Option<&str>, minimum: &str) -> bool {
    let Some(version) = build_version else {
        return false;
    };
    let parse = |value: &str| -> Vec<u64> {
        value
            .split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (version, minimum) = (parse(version), parse(minimum));
    let len = version.len().max(minimum.len());
    for index in 0..len {
        let left = version.get(index).copied().unwrap_or(0);
        let right = minimum.get(index).copied().unwrap_or(0);
        if left != right {
            return left > right;
        }
    }
    true
}

async fn accept_loop(
    listener: TcpListener,
    max_frame_bytes: u64,
    sender: mpsc::Sender<ReceivedMessage>,
    connections: ConnectionTable,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        debug!(%peer, "accepted connection");
        let sender = sender.clone();
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            if let Err(err) = read_connection(stream, max_frame_bytes, sender, connections).await {
                warn!(%peer, %err, "closing connection");
            }
        });
    }
}

async fn read_connection(
    mut stream: TcpStream,
    max_frame_bytes: u64,
    sender: mpsc::Sender<ReceivedMessage>,
    connections: ConnectionTable,
) -> Result<(), TransportError> {
    let mut parser = FrameParser::new(max_frame_bytes);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
        let mut status = parser.push(&buffer[..read]);
        loop {
            match status {
                FrameStatus::NeedMore => break,
                FrameStatus::Error { error } => return Err(error.into()),
                FrameStatus::Complete { payload } => {
                    let message = decode_payload(&payload)?;
                    let received = ReceivedMessage::from_message(&message)?;
                    if let ReceivedMessage::Connection { id, package } = &received {
                        connections
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(id.clone(), package.clone());
                    }
                    if sender.send(received).await.is_err() {
                        return Err(TransportError::Closed);
                    }
                }
            }
            status = parser.next_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::is_supported_version;

    #[test]
    fn version_comparison_is_numeric() {
        assert!(is_supported_version(Some("1.10.0"), "1.9"));
        assert!(is_supported_version(Some("2.0"), "2.0.0"));
        assert!(!is_supported_version(Some("1.2.3"), "1.3"));
        assert!(!is_supported_version(None, "0.1"));
    }
}
