use assert_matches::assert_matches;
use atlantis_codec::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Body {
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
    #[serde(default, with = "base64_bytes_option")]
    extra: Option<Vec<u8>>,
}

#[test]
fn base64_encode_decode() {
    let encoded = base64_encode_str("hello");
    assert_eq!(encoded, "aGVsbG8=");
    let decoded = base64_decode_str(&encoded).unwrap();
    assert_eq!(decoded, b"hello");
}

#[test]
fn base64_invalid_errors() {
    let err = base64_decode_str("***").unwrap_err();
    assert_matches!(err, CodecError::Base64(_));
}

#[test]
fn serde_adapter_writes_base64_strings() {
    let body = Body {
        data: b"{\"a\":1}".to_vec(),
        extra: None,
    };
    let json = serde_json::to_string(&body).unwrap();
    assert_eq!(json, r#"{"data":"eyJhIjoxfQ==","extra":null}"#);
    let decoded: Body = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, body);
}

#[test]
fn serde_adapter_reads_missing_optional_field() {
    let decoded: Body = serde_json::from_str(r#"{"data":"AAE="}"#).unwrap();
    assert_eq!(decoded.data, vec![0, 1]);
    assert_eq!(decoded.extra, None);
}

#[test]
fn serde_adapter_rejects_invalid_base64() {
    let result = serde_json::from_str::<Body>(r#"{"data":"%%%"}"#);
    assert!(result.is_err());
}
