mod envelope;
mod error;
mod id;
mod identifiers;
mod model;
mod registry;
#[cfg(test)]
mod registry_test;

pub use envelope::{BUILD_VERSION, Message, MessageType};
pub use error::CaptureError;
pub use id::PackageId;
pub use identifiers::TaskIdentifiers;
pub use model::{
    BodyLimits, ConnectionPackage, CustomError, DEFAULT_MAX_BODY_BYTES, Device, Header,
    LARGE_BODY_SENTINEL, PackageType, Project, Request, Response, TrafficPackage,
    WebsocketMessagePackage, WebsocketMessageType, WebsocketPayload, now_timestamp,
};
pub use registry::{
    CapturedPackage, PackageRegistry, PackageRegistryConfig, PackageSink, spawn_package_registry,
};
