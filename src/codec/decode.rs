use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, BytesMut};
use futures_core::Stream;
use futures_util::{future, ready};
use http_body::Body;
use tracing::{debug, trace};

use super::{DecodeBuf, Decoder, HEADER_SIZE};
use crate::body::BoxBody;
use crate::metadata::MetadataMap;
use crate::{Code, Status};

const BUFFER_SIZE: usize = 8 * 1024;

/// A stream of messages decoded from a response body.
///
/// Wraps the body and a [`Decoder`], yielding messages in arrival order and
/// capturing trailing metadata once the body ends.
pub struct Streaming<T> {
    decoder: Box<dyn Decoder<Item = T> + Send + 'static>,
    body: BoxBody,
    state: State,
    buf: BytesMut,
    trailers: Option<MetadataMap>,
    max_message_size: Option<usize>,
}

#[derive(Debug)]
enum State {
    ReadHeader,
    ReadBody { len: usize },
    Error,
}

impl<T> Streaming<T> {
    pub(crate) fn new<D>(decoder: D, body: BoxBody, max_message_size: Option<usize>) -> Self
    where
        D: Decoder<Item = T> + Send + 'static,
    {
        Self {
            decoder: Box::new(decoder),
            body,
            state: State::ReadHeader,
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            trailers: None,
            max_message_size,
        }
    }

    /// Fetch the next message from this stream.
    ///
    /// Returns `Ok(None)` once the body is fully drained.
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await {
            Some(Ok(m)) => Ok(Some(m)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Fetch the trailing metadata, draining any remaining messages first.
    pub async fn trailers(&mut self) -> Result<Option<MetadataMap>, Status> {
        // The trailers may already have been pulled while streaming.
        if let Some(trailers) = self.trailers.take() {
            return Ok(Some(trailers));
        }

        while self.message().await?.is_some() {}

        Ok(self.trailers.take())
    }

    fn decode_chunk(&mut self) -> Result<Option<T>, Status> {
        if let State::ReadHeader = self.state {
            if self.buf.remaining() < HEADER_SIZE {
                return Ok(None);
            }

            match self.buf.get_u8() {
                0 => {}
                1 => {
                    return Err(Status::new(
                        Code::Unimplemented,
                        "message compressed, compression support not enabled",
                    ));
                }
                flag => {
                    trace!("unexpected compression flag");
                    return Err(Status::internal(format!(
                        "protocol error: received message with invalid compression flag {}",
                        flag
                    )));
                }
            }

            let len = self.buf.get_u32() as usize;
            if let Some(limit) = self.max_message_size {
                if len > limit {
                    return Err(Status::resource_exhausted(format!(
                        "message of {} bytes exceeds receive limit of {} bytes",
                        len, limit
                    )));
                }
            }
            self.buf.reserve(len);

            self.state = State::ReadBody { len };
        }

        if let State::ReadBody { len } = self.state {
            // Keep reading until the whole message is buffered.
            if self.buf.remaining() < len {
                return Ok(None);
            }

            let mut decode_buf = DecodeBuf::new(&mut self.buf, len);
            let item = self.decoder.decode(&mut decode_buf)?;
            if decode_buf.has_remaining() {
                return Err(Status::internal(
                    "decoder did not consume the whole message",
                ));
            }

            self.state = State::ReadHeader;
            return Ok(Some(item));
        }

        Ok(None)
    }
}

impl<T> Stream for Streaming<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let State::Error = &self.state {
                return Poll::Ready(None);
            }

            if let Some(item) = self.decode_chunk().map_err(|status| {
                self.state = State::Error;
                status
            })? {
                return Poll::Ready(Some(Ok(item)));
            }

            let frame = match ready!(Pin::new(&mut self.body).poll_frame(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(status)) => {
                    self.state = State::Error;
                    debug!("decoder inner stream error: {:?}", status);
                    return Poll::Ready(Some(Err(status)));
                }
                None => {
                    // End of body: any buffered bytes are a truncated frame.
                    return if self.buf.has_remaining() {
                        trace!("unexpected EOF decoding stream");
                        self.state = State::Error;
                        Poll::Ready(Some(Err(Status::internal(
                            "unexpected EOF decoding message stream",
                        ))))
                    } else {
                        Poll::Ready(None)
                    };
                }
            };

            if frame.is_data() {
                if self.trailers.is_some() {
                    self.state = State::Error;
                    return Poll::Ready(Some(Err(Status::internal(
                        "protocol error: data received after trailers",
                    ))));
                }
                self.buf.put(frame.into_data().unwrap());
            } else if frame.is_trailers() {
                let trailers = frame.into_trailers().unwrap();
                self.trailers = Some(MetadataMap::from_headers(trailers));
            }
        }
    }
}

impl<T> fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streaming").finish()
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Streaming<bytes::Bytes>: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BytesCodec, Codec};
    use crate::testing::{data_frame, mock_body, trailers_frame};
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};

    fn streaming(frames: Vec<Result<http_body::Frame<Bytes>, Status>>) -> Streaming<Bytes> {
        Streaming::new(BytesCodec.decoder(), mock_body(frames), None)
    }

    #[tokio::test]
    async fn yields_messages_in_order() {
        let mut stream = streaming(vec![
            Ok(data_frame(&[0, 0, 0, 0, 2, 0xaa, 0xbb])),
            Ok(data_frame(&[0, 0, 0, 0, 1, 0xcc])),
        ]);

        assert_eq!(stream.message().await.unwrap().unwrap(), &[0xaa, 0xbb][..]);
        assert_eq!(stream.message().await.unwrap().unwrap(), &[0xcc][..]);
        assert!(stream.message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reassembles_messages_across_chunks() {
        let mut stream = streaming(vec![
            Ok(data_frame(&[0, 0, 0])),
            Ok(data_frame(&[0, 4, b'a', b'b'])),
            Ok(data_frame(&[b'c', b'd'])),
        ]);

        assert_eq!(stream.message().await.unwrap().unwrap(), &b"abcd"[..]);
        assert!(stream.message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_a_protocol_error() {
        let mut stream = streaming(vec![Ok(data_frame(&[0, 0, 0, 0, 9, 1, 2]))]);

        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        // The stream is fused after an error.
        assert!(stream.message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_header_at_eof_is_a_protocol_error() {
        let mut stream = streaming(vec![Ok(data_frame(&[0, 0, 0]))]);

        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn oversized_message_is_resource_exhausted() {
        let mut stream = Streaming::<Bytes>::new(
            BytesCodec.decoder(),
            mock_body(vec![Ok(data_frame(&[0, 0, 1, 0, 0]))]),
            Some(1024),
        );

        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn compressed_flag_is_rejected() {
        let mut stream = streaming(vec![Ok(data_frame(&[1, 0, 0, 0, 1, 0]))]);

        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn invalid_flag_is_a_protocol_error() {
        let mut stream = streaming(vec![Ok(data_frame(&[3, 0, 0, 0, 0]))]);

        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn captures_native_trailers() {
        let mut map = HeaderMap::new();
        map.insert("grpc-status", HeaderValue::from_static("0"));

        let mut stream = streaming(vec![
            Ok(data_frame(&[0, 0, 0, 0, 1, 9])),
            Ok(trailers_frame(map)),
        ]);

        assert_eq!(stream.message().await.unwrap().unwrap(), &[9][..]);
        assert!(stream.message().await.unwrap().is_none());

        let trailers = stream.trailers().await.unwrap().unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn trailers_drains_remaining_messages() {
        let mut map = HeaderMap::new();
        map.insert("grpc-status", HeaderValue::from_static("0"));

        let mut stream = streaming(vec![
            Ok(data_frame(&[0, 0, 0, 0, 1, 9])),
            Ok(trailers_frame(map)),
        ]);

        let trailers = stream.trailers().await.unwrap().unwrap();
        assert_eq!(trailers.get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn body_error_is_surfaced() {
        let mut stream = streaming(vec![
            Ok(data_frame(&[0, 0, 0, 0, 1, 9])),
            Err(Status::unavailable("connection reset")),
        ]);

        assert!(stream.message().await.unwrap().is_some());
        let err = stream.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }
}
