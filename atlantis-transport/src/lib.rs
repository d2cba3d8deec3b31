mod config;
mod connection;
mod discovery;
mod error;
mod frame;
mod pending;
mod receiver;
mod transport;

pub use config::{
    DEFAULT_DISCOVERY_PORT, DEFAULT_PENDING_CAPACITY, DEFAULT_SERVICE_PORT, DEFAULT_SERVICE_TYPE,
    TransportConfig,
};
pub use connection::{ConnectionId, ConnectionState, is_reset_error};
pub use discovery::{
    Announcement, AnnouncementState, DiscoveryEvent, PeerService, PeerTable, ServiceBrowser,
    StaticBrowser, UdpAdvertiser, UdpBrowser, accepts_peer, service_name,
};
pub use error::TransportError;
pub use frame::{
    FrameError, FrameParser, FrameStatus, LENGTH_PREFIX_BYTES, decode_payload, encode_frame,
    encode_message,
};
pub use pending::PendingQueue;
pub use receiver::{ReceivedMessage, ReceivedMessages, Receiver, is_supported_version};
pub use transport::{
    BrowserFactory, ConnectionSnapshot, FramedTransport, TransportSnapshot, Transporter,
};
