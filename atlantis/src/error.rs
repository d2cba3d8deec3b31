use atlantis_capture::CaptureError;
use atlantis_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtlantisError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
