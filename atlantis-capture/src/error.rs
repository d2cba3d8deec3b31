use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("package registry lane is closed")]
    LaneClosed,
}
