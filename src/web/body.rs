use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::ready;
use http_body::{Body, Frame};
use tracing::debug;

use super::{parse_trailers, Base64Decoder, Base64Encoder, Encoding, TRAILERS_BIT};
use crate::body::BoxBody;
use crate::codec::HEADER_SIZE as FRAME_HEADER_SIZE;
use crate::Status;

/// Request body adapter for gRPC-Web *text* mode.
///
/// Re-encodes the framed request stream as base64, independent of how the
/// inner body chunks its writes.
pub(crate) struct GrpcWebRequestBody {
    inner: BoxBody,
    encoder: Base64Encoder,
    finished: bool,
}

impl GrpcWebRequestBody {
    pub(crate) fn new(inner: BoxBody) -> Self {
        Self {
            inner,
            encoder: Base64Encoder::new(),
            finished: false,
        }
    }
}

impl Body for GrpcWebRequestBody {
    type Data = Bytes;
    type Error = Status;

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        let encoded = this.encoder.encode(&data);
                        if !encoded.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(encoded))));
                        }
                        // Less than one group buffered so far; keep pulling.
                    }
                }
                Some(Err(status)) => return Poll::Ready(Some(Err(status))),
                None => {
                    this.finished = true;
                    let tail = this.encoder.finish();
                    if !tail.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(tail))));
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Response body adapter for gRPC-Web.
///
/// Optionally decodes base64 (text mode), then splits the stream into
/// message frames, which pass through verbatim, and the trailers frame,
/// which is parsed and surfaced as native trailers. Anything after the
/// trailers frame, or a body that ends without one, is a protocol error.
pub(crate) struct GrpcWebResponseBody {
    inner: BoxBody,
    decoder: Option<Base64Decoder>,
    buf: BytesMut,
    state: State,
    inner_done: bool,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Header,
    Message { remaining: usize },
    Trailer { len: usize },
    AfterTrailers,
}

impl GrpcWebResponseBody {
    pub(crate) fn new(inner: BoxBody, encoding: Encoding) -> Self {
        Self {
            inner,
            decoder: match encoding {
                Encoding::Base64 => Some(Base64Decoder::new()),
                Encoding::None => None,
            },
            buf: BytesMut::new(),
            state: State::Header,
            inner_done: false,
        }
    }

    /// Produce the next frame out of already-buffered bytes, if any.
    fn frame_from_buf(&mut self) -> Result<Option<Frame<Bytes>>, Status> {
        loop {
            match self.state {
                State::Header => {
                    if self.buf.len() < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }

                    let flag = self.buf[0];
                    let len =
                        u32::from_be_bytes(self.buf[1..FRAME_HEADER_SIZE].try_into().unwrap())
                            as usize;

                    if flag & TRAILERS_BIT != 0 {
                        if flag != TRAILERS_BIT {
                            return Err(Status::internal(
                                "protocol error: compressed trailers frame is not supported",
                            ));
                        }
                        self.buf.advance(FRAME_HEADER_SIZE);
                        self.state = State::Trailer { len };
                        continue;
                    }

                    if flag > 1 {
                        return Err(Status::internal(format!(
                            "protocol error: invalid frame flag {}",
                            flag
                        )));
                    }

                    // Forward the header plus whatever payload is buffered.
                    let take = self.buf.len().min(FRAME_HEADER_SIZE + len);
                    let chunk = self.buf.split_to(take).freeze();
                    let remaining = len - (take - FRAME_HEADER_SIZE);
                    self.state = if remaining == 0 {
                        State::Header
                    } else {
                        State::Message { remaining }
                    };
                    return Ok(Some(Frame::data(chunk)));
                }
                State::Message { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let take = self.buf.len().min(remaining);
                    let chunk = self.buf.split_to(take).freeze();
                    let left = remaining - take;
                    self.state = if left == 0 {
                        State::Header
                    } else {
                        State::Message { remaining: left }
                    };
                    return Ok(Some(Frame::data(chunk)));
                }
                State::Trailer { len } => {
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let block = self.buf.split_to(len);
                    let trailers = parse_trailers(&block)?;
                    self.state = State::AfterTrailers;
                    return Ok(Some(Frame::trailers(trailers)));
                }
                State::AfterTrailers => {
                    if !self.buf.is_empty() {
                        return Err(Status::internal(
                            "protocol error: data received after the trailers frame",
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn check_eof(&self) -> Result<(), Status> {
        if let Some(decoder) = &self.decoder {
            decoder.finish()?;
        }

        match self.state {
            State::AfterTrailers => Ok(()),
            State::Header if self.buf.is_empty() => Err(Status::internal(
                "protocol error: response stream ended without a trailers frame",
            )),
            _ => Err(Status::internal(
                "protocol error: unexpected end of response stream",
            )),
        }
    }
}

impl Body for GrpcWebResponseBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            if let Some(frame) = this.frame_from_buf()? {
                return Poll::Ready(Some(Ok(frame)));
            }

            if this.inner_done {
                return Poll::Ready(match this.check_eof() {
                    Ok(()) => None,
                    Err(status) => Some(Err(status)),
                });
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        match &mut this.decoder {
                            Some(decoder) => {
                                let decoded = decoder.decode(&data)?;
                                this.buf.extend_from_slice(&decoded);
                            }
                            None => this.buf.extend_from_slice(&data),
                        }
                    } else {
                        debug!("ignoring native trailers on a grpc-web response");
                    }
                }
                Some(Err(status)) => return Poll::Ready(Some(Err(status))),
                None => this.inner_done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{data_frame, mock_body};
    use crate::util::base64::STANDARD;
    use crate::web::encode_trailers_frame;
    use crate::Code;
    use base64::Engine as _;
    use http::{HeaderMap, HeaderValue};
    use http_body_util::BodyExt;

    fn trailers_map() -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("grpc-status", HeaderValue::from_static("0"));
        map.insert("grpc-message", HeaderValue::from_static("ok"));
        map
    }

    async fn drain(
        mut body: GrpcWebResponseBody,
    ) -> Result<(Vec<u8>, Option<HeaderMap>), Status> {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            match frame.into_data() {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(frame) => trailers = frame.into_trailers().ok(),
            }
        }
        Ok((data, trailers))
    }

    #[tokio::test]
    async fn demuxes_messages_and_trailers() {
        let mut wire = vec![0, 0, 0, 0, 2, 0xaa, 0xbb];
        wire.extend_from_slice(&encode_trailers_frame(&trailers_map()));

        let body = GrpcWebResponseBody::new(
            mock_body(vec![Ok(data_frame(&wire))]),
            Encoding::None,
        );
        let (data, trailers) = drain(body).await.unwrap();

        assert_eq!(data, [0, 0, 0, 0, 2, 0xaa, 0xbb]);
        let trailers = trailers.unwrap();
        assert_eq!(trailers.get("grpc-status").unwrap(), "0");
        assert_eq!(trailers.get("grpc-message").unwrap(), "ok");
    }

    #[tokio::test]
    async fn text_mode_decodes_across_chunk_boundaries() {
        let mut wire = vec![0, 0, 0, 0, 3, 1, 2, 3];
        wire.extend_from_slice(&encode_trailers_frame(&trailers_map()));
        let encoded = STANDARD.encode(&wire).into_bytes();

        // Feed the base64 in awkwardly sized pieces.
        let frames = encoded
            .chunks(5)
            .map(|chunk| Ok(data_frame(chunk)))
            .collect();

        let body = GrpcWebResponseBody::new(mock_body(frames), Encoding::Base64);
        let (data, trailers) = drain(body).await.unwrap();

        assert_eq!(data, [0, 0, 0, 0, 3, 1, 2, 3]);
        assert!(trailers.is_some());
    }

    #[tokio::test]
    async fn bytes_after_trailers_frame_are_rejected() {
        let mut wire = Vec::from(&encode_trailers_frame(&trailers_map())[..]);
        wire.extend_from_slice(&[0, 0, 0, 0, 0]);

        let body = GrpcWebResponseBody::new(
            mock_body(vec![Ok(data_frame(&wire))]),
            Encoding::None,
        );
        let err = drain(body).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn eof_without_trailers_frame_is_rejected() {
        let body = GrpcWebResponseBody::new(
            mock_body(vec![Ok(data_frame(&[0, 0, 0, 0, 1, 7]))]),
            Encoding::None,
        );
        let err = drain(body).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn truncated_frame_is_rejected() {
        let body = GrpcWebResponseBody::new(
            mock_body(vec![Ok(data_frame(&[0, 0, 0, 0, 9, 1]))]),
            Encoding::None,
        );
        let err = drain(body).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn compressed_trailers_flag_is_rejected() {
        let body = GrpcWebResponseBody::new(
            mock_body(vec![Ok(data_frame(&[0x81, 0, 0, 0, 0]))]),
            Encoding::None,
        );
        let err = drain(body).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn request_body_is_canonical_base64() {
        let inner = mock_body(vec![
            Ok(data_frame(&[0, 0, 0, 0, 4])),
            Ok(data_frame(b"ab")),
            Ok(data_frame(b"cd")),
        ]);
        let mut body = GrpcWebRequestBody::new(inner);

        let mut out = Vec::new();
        while let Some(frame) = body.frame().await {
            out.extend_from_slice(&frame.unwrap().into_data().unwrap());
        }

        let expected = STANDARD.encode([0, 0, 0, 0, 4, b'a', b'b', b'c', b'd']);
        assert_eq!(out, expected.into_bytes());
        assert!(body.is_end_stream());
    }
}
