use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};

use super::TRAILERS_BIT;
use crate::codec::HEADER_SIZE as FRAME_HEADER_SIZE;
use crate::status::{GRPC_MESSAGE_HEADER, GRPC_STATUS_HEADER};
use crate::Status;

/// Parses the payload of a gRPC-Web trailers frame.
///
/// The block is an HTTP/1-style header list: `name: value` lines separated
/// by CRLF, ASCII, no terminating empty line required. Names compare
/// case-insensitively; single-valued gRPC trailers may not repeat.
pub(crate) fn parse_trailers(block: &[u8]) -> Result<HeaderMap, Status> {
    let mut map = HeaderMap::new();

    for line in block.split(|&b| b == b'\n') {
        let line = match line.strip_suffix(b"\r") {
            Some(rest) => rest,
            None => line,
        };
        if line.is_empty() {
            continue;
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Status::internal("protocol error: trailer line missing a colon"))?;
        let (name, value) = line.split_at(colon);

        let name = trim_ascii(name).to_ascii_lowercase();
        let name = HeaderName::from_bytes(&name)
            .map_err(|_| Status::internal("protocol error: invalid trailer name"))?;
        let value = HeaderValue::from_bytes(trim_ascii(&value[1..]))
            .map_err(|_| Status::internal("protocol error: invalid trailer value"))?;

        if matches!(name.as_str(), GRPC_STATUS_HEADER | GRPC_MESSAGE_HEADER)
            && map.contains_key(&name)
        {
            return Err(Status::internal(format!(
                "protocol error: duplicated {} trailer",
                name
            )));
        }

        map.append(name, value);
    }

    Ok(map)
}

/// Builds a gRPC-Web trailers frame from a header map.
///
/// The inverse of [`parse_trailers`] plus the frame header; handy for mock
/// servers in tests.
pub fn encode_trailers_frame(trailers: &HeaderMap) -> Bytes {
    let block_len: usize = trailers
        .iter()
        .map(|(name, value)| name.as_str().len() + 1 + value.len() + 2)
        .sum();

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + block_len);
    frame.put_u8(TRAILERS_BIT);
    frame.put_u32(block_len as u32);
    for (name, value) in trailers.iter() {
        frame.put_slice(name.as_str().as_bytes());
        frame.put_u8(b':');
        frame.put_slice(value.as_bytes());
        frame.put_slice(b"\r\n");
    }
    frame.freeze()
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
