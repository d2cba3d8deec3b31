use base64::Engine;

use crate::CodecError;

pub fn base64_encode_bytes(input: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(input)
}

pub fn base64_encode_str(input: &str) -> String {
    base64_encode_bytes(input.as_bytes())
}

pub fn base64_decode_bytes(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(input)
        .map_err(|err| CodecError::Base64(err.to_string()))
}

pub fn base64_decode_str(input: &str) -> Result<Vec<u8>, CodecError> {
    base64_decode_bytes(input.as_bytes())
}

/// Serde adapter writing a byte buffer as a standard base64 string.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&super::base64_encode_bytes(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::base64_decode_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Same as [`base64_bytes`] for optional buffers; `None` maps to `null`.
pub mod base64_bytes_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&super::base64_encode_bytes(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| super::base64_decode_str(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
