use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::CodecError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn gzip_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(input)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| CodecError::Compression(err.to_string()))
}

pub fn gzip_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(input);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    Ok(output)
}

pub fn is_gzip(input: &[u8]) -> bool {
    input.starts_with(&GZIP_MAGIC)
}

/// Compresses `input`, handing back the raw bytes when compression fails.
pub fn gzip_or_raw(input: &[u8]) -> Vec<u8> {
    gzip_compress(input).unwrap_or_else(|_| input.to_vec())
}

/// Inverse of [`gzip_or_raw`]: payloads without a gzip header, or with a
/// corrupt one, are treated as already raw.
pub fn gunzip_or_raw(input: &[u8]) -> Vec<u8> {
    if !is_gzip(input) {
        return input.to_vec();
    }
    gzip_decompress(input).unwrap_or_else(|_| input.to_vec())
}
