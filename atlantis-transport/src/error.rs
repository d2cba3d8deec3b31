use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("message decode error: {0}")]
    Decode(String),
    #[error("message encode error: {0}")]
    Encode(String),
    #[error("transport is closed")]
    Closed,
}

impl From<atlantis_capture::CaptureError> for TransportError {
    fn from(err: atlantis_capture::CaptureError) -> Self {
        match err {
            atlantis_capture::CaptureError::Encode(message) => Self::Encode(message),
            other => Self::Decode(other.to_string()),
        }
    }
}
