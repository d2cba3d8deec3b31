mod capture;
mod config;
mod delegate;
mod error;
mod manual;
mod orchestrator;

pub use atlantis_capture::{
    BodyLimits, ConnectionPackage, CustomError, Header, LARGE_BODY_SENTINEL, Message, MessageType,
    PackageId, PackageType, Request, Response, TaskIdentifiers, TrafficPackage,
    WebsocketMessagePackage, WebsocketMessageType, WebsocketPayload,
};
pub use atlantis_transport::{FramedTransport, TransportConfig, Transporter};
pub use capture::{CaptureEvent, CaptureEventSource, CaptureHandle, TaskKind};
pub use config::AtlantisConfig;
pub use delegate::AtlantisDelegate;
pub use error::AtlantisError;
pub use manual::{
    GRPC_METHOD, GrpcCall, GrpcStreamingType, grpc_status_description, grpc_status_name,
};
pub use orchestrator::{Atlantis, AtlantisBuilder};
