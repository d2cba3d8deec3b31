use assert_matches::assert_matches;
use atlantis_codec::*;

#[test]
fn gzip_roundtrip() {
    let input = b"hello gzip";
    let compressed = gzip_compress(input).unwrap();
    assert!(is_gzip(&compressed));
    let decompressed = gzip_decompress(&compressed).unwrap();
    assert_eq!(decompressed, input);
}

#[test]
fn gzip_invalid_errors() {
    let err = gzip_decompress(b"not gzip").unwrap_err();
    assert_matches!(err, CodecError::Compression(_));
}

#[test]
fn gunzip_or_raw_passes_plain_json_through() {
    let input = br#"{"id":"abc"}"#;
    assert_eq!(gunzip_or_raw(input), input.to_vec());
}

#[test]
fn gunzip_or_raw_inflates_compressed_payload() {
    let input = br#"{"messageType":"traffic"}"#;
    let compressed = gzip_or_raw(input);
    assert_ne!(compressed, input.to_vec());
    assert_eq!(gunzip_or_raw(&compressed), input.to_vec());
}

#[test]
fn gunzip_or_raw_keeps_corrupt_gzip_bytes() {
    let input = [0x1f, 0x8b, 0x00, 0x01, 0x02];
    assert_eq!(gunzip_or_raw(&input), input.to_vec());
}
