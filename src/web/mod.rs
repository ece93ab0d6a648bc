//! gRPC-Web support: content types, body re-encoding, and in-body trailers.
//!
//! gRPC-Web differs from native gRPC in two ways the call core has to absorb:
//! trailers arrive inside the response body as a dedicated frame (flag bit 7
//! set), and in *text* mode the entire body is base64 on the wire.

mod base64;
mod body;
mod trailers;

pub(crate) use self::base64::{Base64Decoder, Base64Encoder};
pub(crate) use self::body::{GrpcWebRequestBody, GrpcWebResponseBody};
pub use self::trailers::encode_trailers_frame;
pub(crate) use self::trailers::parse_trailers;

use http::header::CONTENT_TYPE;
use http::HeaderMap;

pub(crate) mod content_types {
    pub(crate) const GRPC: &str = "application/grpc";
    pub(crate) const GRPC_WEB: &str = "application/grpc-web";
    pub(crate) const GRPC_WEB_PROTO: &str = "application/grpc-web+proto";
    pub(crate) const GRPC_WEB_TEXT: &str = "application/grpc-web-text";
    pub(crate) const GRPC_WEB_TEXT_PROTO: &str = "application/grpc-web-text+proto";
}

/// 8th (MSB) bit of the flag byte marks an in-body trailers frame.
pub(crate) const TRAILERS_BIT: u8 = 0b1000_0000;

/// How gRPC-Web bodies are encoded on the wire.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// `application/grpc-web`: binary frames, as in native gRPC.
    None,
    /// `application/grpc-web-text`: the body is base64.
    Base64,
}

impl Encoding {
    pub(crate) fn from_content_type(headers: &HeaderMap) -> Encoding {
        use content_types::*;

        match headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            Some(GRPC_WEB_TEXT) | Some(GRPC_WEB_TEXT_PROTO) => Encoding::Base64,
            _ => Encoding::None,
        }
    }

    pub(crate) fn to_content_type(self) -> &'static str {
        match self {
            Encoding::Base64 => content_types::GRPC_WEB_TEXT_PROTO,
            Encoding::None => content_types::GRPC_WEB_PROTO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn encoding_from_content_type() {
        let cases = &[
            (content_types::GRPC_WEB, Encoding::None),
            (content_types::GRPC_WEB_PROTO, Encoding::None),
            (content_types::GRPC_WEB_TEXT, Encoding::Base64),
            (content_types::GRPC_WEB_TEXT_PROTO, Encoding::Base64),
            ("foo", Encoding::None),
        ];

        for (content_type, expected) in cases {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            assert_eq!(
                Encoding::from_content_type(&headers),
                *expected,
                "{}",
                content_type
            );
        }
    }
}
