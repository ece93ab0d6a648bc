//! Call metadata: ASCII and binary key/value pairs carried in HTTP headers
//! and trailers.

mod timeout;

pub use self::timeout::{decode_timeout, encode_timeout};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::util::base64::{STANDARD, STANDARD_NO_PAD};
use crate::Status;
use base64::Engine as _;

pub(crate) const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Headers the call computes itself; caller-supplied values are ignored.
const RESERVED_HEADERS: &[&str] = &[GRPC_TIMEOUT_HEADER, "te", "content-type"];

const BIN_SUFFIX: &str = "-bin";

/// A map of gRPC call metadata.
///
/// ASCII values are stored as-is. Binary values live under keys ending in
/// `-bin` and are kept base64-encoded at rest, exactly as they travel on the
/// wire; [`get_bin`] decodes on access.
///
/// [`get_bin`]: MetadataMap::get_bin
#[derive(Clone, Debug, Default)]
pub struct MetadataMap {
    headers: HeaderMap,
}

impl MetadataMap {
    pub fn new() -> Self {
        MetadataMap::default()
    }

    /// Insert an ASCII metadata value, replacing any previous one.
    ///
    /// Keys ending in `-bin` must go through [`insert_bin`] instead.
    ///
    /// [`insert_bin`]: MetadataMap::insert_bin
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), Status> {
        if key.ends_with(BIN_SUFFIX) {
            return Err(Status::invalid_argument(format!(
                "binary metadata key {} requires a binary value",
                key
            )));
        }
        let name = parse_key(key)?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Status::invalid_argument(format!("invalid metadata value for {}", key)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Insert a binary metadata value under a `-bin` key.
    ///
    /// The value is base64-encoded without padding, the form peers expect.
    pub fn insert_bin(&mut self, key: &str, value: &[u8]) -> Result<(), Status> {
        if !key.ends_with(BIN_SUFFIX) {
            return Err(Status::invalid_argument(format!(
                "binary metadata key {} must end in -bin",
                key
            )));
        }
        let name = parse_key(key)?;
        let encoded = STANDARD_NO_PAD.encode(value);
        // Base64 output is always a valid header value.
        let value = HeaderValue::from_str(&encoded).expect("base64 is a valid header value");
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get an ASCII metadata value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.to_str().ok())
    }

    /// Get and decode a binary (`-bin`) metadata value.
    pub fn get_bin(&self, key: &str) -> Option<Result<Bytes, Status>> {
        self.headers.get(key).map(|value| {
            STANDARD
                .decode(value.as_bytes())
                .map(Bytes::from)
                .map_err(|_| {
                    Status::internal(format!("invalid base64 in binary metadata {}", key))
                })
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over the raw header entries (binary values stay encoded).
    pub fn iter(&self) -> http::header::Iter<'_, HeaderValue> {
        self.headers.iter()
    }

    pub(crate) fn from_headers(headers: HeaderMap) -> Self {
        MetadataMap { headers }
    }

    pub(crate) fn as_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Copy caller metadata into an outgoing request, skipping headers the
    /// call computes itself.
    pub(crate) fn append_to_request(&self, headers: &mut HeaderMap) {
        for (name, value) in self.headers.iter() {
            if RESERVED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
    }
}

fn parse_key(key: &str) -> Result<HeaderName, Status> {
    HeaderName::from_bytes(key.as_bytes())
        .map_err(|_| Status::invalid_argument(format!("invalid metadata key {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_roundtrip() {
        let mut map = MetadataMap::new();
        map.insert("x-request-id", "abc123").unwrap();
        assert_eq!(map.get("x-request-id"), Some("abc123"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn ascii_rejects_bin_key() {
        let mut map = MetadataMap::new();
        let err = map.insert("trace-proto-bin", "zzz").unwrap_err();
        assert_eq!(err.code(), crate::Code::InvalidArgument);
    }

    #[test]
    fn bin_values_are_base64_at_rest() {
        let mut map = MetadataMap::new();
        map.insert_bin("trace-proto-bin", b"\x00\x01\xff").unwrap();

        // Raw form is base64 without padding.
        assert_eq!(map.get("trace-proto-bin"), Some("AAH/"));
        let decoded = map.get_bin("trace-proto-bin").unwrap().unwrap();
        assert_eq!(&decoded[..], b"\x00\x01\xff");
    }

    #[test]
    fn bin_decoding_accepts_padding() {
        let mut headers = HeaderMap::new();
        headers.insert("trace-proto-bin", HeaderValue::from_static("AAE="));
        let map = MetadataMap::from_headers(headers);
        // Padded and unpadded forms both decode.
        let decoded = map.get_bin("trace-proto-bin").unwrap().unwrap();
        assert_eq!(&decoded[..], b"\x00\x01");
    }

    #[test]
    fn bin_key_requires_suffix() {
        let mut map = MetadataMap::new();
        let err = map.insert_bin("trace-proto", b"x").unwrap_err();
        assert_eq!(err.code(), crate::Code::InvalidArgument);
    }

    #[test]
    fn reserved_headers_are_not_copied() {
        let mut map = MetadataMap::new();
        map.insert("grpc-timeout", "1S").unwrap();
        map.insert("te", "gzip").unwrap();
        map.insert("x-custom", "kept").unwrap();

        let mut out = HeaderMap::new();
        map.append_to_request(&mut out);

        assert!(!out.contains_key("grpc-timeout"));
        assert!(!out.contains_key("te"));
        assert_eq!(out.get("x-custom").unwrap(), "kept");
    }
}
