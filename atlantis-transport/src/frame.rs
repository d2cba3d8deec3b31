use atlantis_capture::Message;
use atlantis_codec::{gunzip_or_raw, gzip_or_raw};
use thiserror::Error;

use crate::error::TransportError;

pub const LENGTH_PREFIX_BYTES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame length is zero")]
    ZeroLength,
    #[error("frame length {length} exceeds limit {max}")]
    TooLarge { length: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    NeedMore,
    Complete { payload: Vec<u8> },
    Error { error: FrameError },
}

/// `<u64 little-endian length><payload>`
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Serializes the envelope, gzips it when possible and frames the result.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, TransportError> {
    let json = message.to_json()?;
    Ok(encode_frame(&gzip_or_raw(&json)))
}

pub fn decode_payload(payload: &[u8]) -> Result<Message, TransportError> {
    let json = gunzip_or_raw(payload);
    Message::from_json(&json).map_err(|err| TransportError::Decode(err.to_string()))
}

/// Incremental frame reader. Bytes go in through [`FrameParser::push`]; each call
/// yields at most one frame, call [`FrameParser::next_frame`] to drain the rest.
#[derive(Debug)]
pub struct FrameParser {
    buffer: Vec<u8>,
    max_frame_bytes: u64,
}

impl FrameParser {
    pub fn new(max_frame_bytes: u64) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> FrameStatus {
        self.buffer.extend_from_slice(bytes);
        self.next_frame()
    }

    pub fn next_frame(&mut self) -> FrameStatus {
        if self.buffer.len() < LENGTH_PREFIX_BYTES {
            return FrameStatus::NeedMore;
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_BYTES]);
        let length = u64::from_le_bytes(prefix);
        if length == 0 {
            return FrameStatus::Error {
                error: FrameError::ZeroLength,
            };
        }
        if length > self.max_frame_bytes {
            return FrameStatus::Error {
                error: FrameError::TooLarge {
                    length,
                    max: self.max_frame_bytes,
                },
            };
        }

        let end = LENGTH_PREFIX_BYTES + length as usize;
        if self.buffer.len() < end {
            return FrameStatus::NeedMore;
        }
        let payload = self.buffer[LENGTH_PREFIX_BYTES..end].to_vec();
        self.buffer.drain(..end);
        FrameStatus::Complete { payload }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
