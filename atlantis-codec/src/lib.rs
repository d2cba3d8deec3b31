mod compress;
mod encode;
mod error;

pub use compress::{gunzip_or_raw, gzip_compress, gzip_decompress, gzip_or_raw, is_gzip};
pub use encode::{
    base64_bytes, base64_bytes_option, base64_decode_bytes, base64_decode_str,
    base64_encode_bytes, base64_encode_str,
};
pub use error::CodecError;
