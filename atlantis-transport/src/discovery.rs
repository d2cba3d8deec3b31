use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::TransportConfig;

const MAX_ANNOUNCEMENT_BYTES: usize = 2048;

/// A listening peer as advertised on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerService {
    pub name: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(PeerService),
    Removed(String),
}

/// Browses for peers and reports them until the event receiver is dropped.
pub trait ServiceBrowser: Send {
    fn spawn(self: Box<Self>, events: mpsc::UnboundedSender<DiscoveryEvent>) -> JoinHandle<()>;
}

/// `"<AppName>-<hostIdentifier>"`
pub fn service_name(app_name: &str, host: &str) -> String {
    format!("{app_name}-{host}")
}

pub fn accepts_peer(host_filter: Option<&str>, peer_name: &str) -> bool {
    match host_filter {
        None => true,
        Some(filter) if filter.is_empty() => true,
        Some(filter) => peer_name
            .to_lowercase()
            .contains(&filter.to_lowercase()),
    }
}

/// Reports a fixed set of peers once.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    peers: Vec<PeerService>,
}

impl StaticBrowser {
    pub fn new(peers: Vec<PeerService>) -> Self {
        Self { peers }
    }
}

impl ServiceBrowser for StaticBrowser {
    fn spawn(self: Box<Self>, events: mpsc::UnboundedSender<DiscoveryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            for peer in self.peers {
                if events.send(DiscoveryEvent::Found(peer)).is_err() {
                    return;
                }
            }
            events.closed().await;
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementState {
    Alive,
    Bye,
}

/// Datagram a peer broadcasts to advertise its service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub service_type: String,
    pub name: String,
    pub port: u16,
    pub state: AnnouncementState,
}

/// Peers seen on the wire and when they were last heard from.
#[derive(Debug)]
pub struct PeerTable {
    ttl: Duration,
    peers: HashMap<String, (PeerService, Instant)>,
}

impl PeerTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: HashMap::new(),
        }
    }

    pub fn apply(
        &mut self,
        announcement: Announcement,
        source: IpAddr,
        now: Instant,
    ) -> Option<DiscoveryEvent> {
        match announcement.state {
            AnnouncementState::Alive => {
                let peer = PeerService {
                    name: announcement.name.clone(),
                    addr: SocketAddr::new(source, announcement.port),
                };
                let previous = self
                    .peers
                    .insert(announcement.name, (peer.clone(), now));
                if previous.is_none_or(|(known, _)| known != peer) {
                    debug!(peer = %peer.name, addr = %peer.addr, "peer discovered");
                }
                // Re-reported on every announcement so a dropped connection is redialed.
                Some(DiscoveryEvent::Found(peer))
            }
            AnnouncementState::Bye => self
                .peers
                .remove(&announcement.name)
                .map(|_| DiscoveryEvent::Removed(announcement.name)),
        }
    }

    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) > ttl)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.peers.remove(name);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Listens for [`Announcement`] datagrams of one service type.
#[derive(Debug, Clone)]
pub struct UdpBrowser {
    service_type: String,
    bind_addr: SocketAddr,
    ttl: Duration,
}

impl UdpBrowser {
    pub fn new(service_type: impl Into<String>, bind_addr: SocketAddr, ttl: Duration) -> Self {
        Self {
            service_type: service_type.into(),
            bind_addr,
            ttl,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.service_type.clone(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.discovery_port),
            config.peer_ttl(),
        )
    }
}

impl ServiceBrowser for UdpBrowser {
    fn spawn(self: Box<Self>, events: mpsc::UnboundedSender<DiscoveryEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let socket = match UdpSocket::bind(self.bind_addr).await {
                Ok(socket) => socket,
                Err(err) => {
                    error!(addr = %self.bind_addr, %err, "failed to bind discovery socket");
                    return;
                }
            };
            info!(addr = %self.bind_addr, service_type = %self.service_type, "browsing for peers");

            let mut table = PeerTable::new(self.ttl);
            let mut sweep = tokio::time::interval((self.ttl / 2).max(Duration::from_millis(100)));
            let mut buffer = vec![0u8; MAX_ANNOUNCEMENT_BYTES];
            loop {
                tokio::select! {
                    _ = events.closed() => break,
                    received = socket.recv_from(&mut buffer) => {
                        let (len, from) = match received {
                            Ok(received) => received,
                            Err(err) => {
                                warn!(%err, "discovery receive failed");
                                continue;
                            }
                        };
                        let announcement: Announcement = match serde_json::from_slice(&buffer[..len]) {
                            Ok(announcement) => announcement,
                            Err(err) => {
                                trace!(%from, %err, "ignoring malformed announcement");
                                continue;
                            }
                        };
                        if announcement.service_type != self.service_type {
                            continue;
                        }
                        if let Some(event) = table.apply(announcement, from.ip(), Instant::now()) {
                            trace!(?event, "discovery event");
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    _ = sweep.tick() => {
                        for name in table.expire(Instant::now()) {
                            debug!(peer = %name, "peer expired");
                            if events.send(DiscoveryEvent::Removed(name)).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Peer-side announcer. Broadcasts `alive` periodically and `bye` on stop.
#[derive(Debug)]
pub struct UdpAdvertiser {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl UdpAdvertiser {
    pub async fn spawn(
        config: &TransportConfig,
        name: String,
        port: u16,
        target: SocketAddr,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
        socket.set_broadcast(true)?;
        let interval = config.announce_interval();
        let mut announcement = Announcement {
            service_type: config.service_type.clone(),
            name,
            port,
            state: AnnouncementState::Alive,
        };
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => announce(&socket, &announcement, target).await,
                }
            }
            announcement.state = AnnouncementState::Bye;
            announce(&socket, &announcement, target).await;
        });

        Ok(Self {
            stop: Some(stop),
            task,
        })
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for UdpAdvertiser {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

async fn announce(socket: &UdpSocket, announcement: &Announcement, target: SocketAddr) {
    let bytes = match serde_json::to_vec(announcement) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, "failed to encode announcement");
            return;
        }
    };
    if let Err(err) = socket.send_to(&bytes, target).await {
        warn!(%target, %err, "failed to send announcement");
    }
}
