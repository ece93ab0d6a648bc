use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

use crate::util::base64::STANDARD;
use crate::Status;

const SCRATCH_SIZE: usize = 4096;

/// Streaming base64 encoder for request bodies.
///
/// Writes arrive in arbitrary sizes; whole 3-byte groups are encoded
/// immediately and a 0–2 byte remainder is carried into the next write, so
/// the concatenated output is the canonical encoding of the concatenated
/// input regardless of chunking.
#[derive(Debug)]
pub(crate) struct Base64Encoder {
    buf: BytesMut,
    remainder: [u8; 3],
    remainder_len: usize,
}

impl Base64Encoder {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(SCRATCH_SIZE),
            remainder: [0; 3],
            remainder_len: 0,
        }
    }

    /// Encode one chunk, returning the bytes ready to forward (possibly
    /// empty while a group is still incomplete).
    pub(crate) fn encode(&mut self, mut data: &[u8]) -> Bytes {
        if self.remainder_len > 0 {
            let take = (3 - self.remainder_len).min(data.len());
            self.remainder[self.remainder_len..self.remainder_len + take]
                .copy_from_slice(&data[..take]);
            self.remainder_len += take;
            data = &data[take..];

            if self.remainder_len < 3 {
                return Bytes::new();
            }

            let mut quad = [0u8; 4];
            let n = STANDARD
                .encode_slice(self.remainder, &mut quad)
                .expect("a quad holds one encoded group");
            debug_assert_eq!(n, 4);
            self.buf.put_slice(&quad);
            self.remainder_len = 0;
        }

        let whole = (data.len() / 3) * 3;
        if whole > 0 {
            self.buf.put_slice(STANDARD.encode(&data[..whole]).as_bytes());
        }

        let rest = &data[whole..];
        self.remainder[..rest.len()].copy_from_slice(rest);
        self.remainder_len = rest.len();

        self.buf.split().freeze()
    }

    /// Encode the held remainder as a final padded group.
    pub(crate) fn finish(&mut self) -> Bytes {
        if self.remainder_len == 0 {
            return Bytes::new();
        }

        let mut quad = [0u8; 4];
        let n = STANDARD
            .encode_slice(&self.remainder[..self.remainder_len], &mut quad)
            .expect("a quad holds one encoded group");
        self.remainder_len = 0;
        Bytes::copy_from_slice(&quad[..n])
    }
}

/// Streaming base64 decoder for text-mode response bodies.
///
/// Chunks may split anywhere; only 4-character-aligned prefixes are decoded
/// and up to 3 pending characters wait for the next chunk.
#[derive(Debug)]
pub(crate) struct Base64Decoder {
    pending: BytesMut,
}

impl Base64Decoder {
    pub(crate) fn new() -> Self {
        Self {
            pending: BytesMut::new(),
        }
    }

    pub(crate) fn decode(&mut self, data: &[u8]) -> Result<Bytes, Status> {
        self.pending.extend_from_slice(data);

        let aligned = (self.pending.len() / 4) * 4;
        if aligned == 0 {
            return Ok(Bytes::new());
        }

        let chunk = self.pending.split_to(aligned);
        let decoded = STANDARD
            .decode(&chunk[..])
            .map_err(|_| Status::internal("protocol error: invalid base64 in response body"))?;
        Ok(Bytes::from(decoded))
    }

    /// The body ended; anything still pending means it was truncated.
    pub(crate) fn finish(&self) -> Result<(), Status> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(Status::internal(
                "protocol error: truncated base64 in response body",
            ))
        }
    }
}
