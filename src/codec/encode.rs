use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use futures_core::Stream;
use futures_util::{ready, StreamExt};
use http_body::{Body, Frame};
use pin_project::pin_project;

use super::{EncodeBuf, Encoder, HEADER_SIZE};
use crate::Status;

const BUFFER_SIZE: usize = 8 * 1024;

/// Turns a stream of messages into a framed request body, serializing each
/// message on demand as the transport pulls.
pub(crate) fn encode_client<T, U>(
    encoder: T,
    source: U,
) -> EncodeBody<impl Stream<Item = Result<Bytes, Status>>>
where
    T: Encoder,
    U: Stream<Item = T::Item>,
{
    EncodeBody::new(encode(encoder, source))
}

fn encode<T, U>(mut encoder: T, source: U) -> impl Stream<Item = Result<Bytes, Status>>
where
    T: Encoder,
    U: Stream<Item = T::Item>,
{
    async_stream::stream! {
        let mut buf = BytesMut::with_capacity(BUFFER_SIZE);

        futures_util::pin_mut!(source);

        while let Some(item) = source.next().await {
            yield encode_frame(&mut encoder, &mut buf, item);
        }
    }
}

/// Encodes one message as a `flag | len | payload` frame.
///
/// The scratch buffer keeps its capacity across calls; every returned frame
/// is a detached `Bytes`.
pub(crate) fn encode_frame<T>(
    encoder: &mut T,
    buf: &mut BytesMut,
    item: T::Item,
) -> Result<Bytes, Status>
where
    T: Encoder,
{
    buf.reserve(HEADER_SIZE);
    buf.put_slice(&[0; HEADER_SIZE]);

    encoder.encode(item, &mut EncodeBuf::new(buf))?;

    // Now that the message is serialized the header can be filled in.
    let len = buf.len() - HEADER_SIZE;
    assert!(len <= u32::MAX as usize);
    {
        let mut header = &mut buf[..HEADER_SIZE];
        header.put_u8(0);
        header.put_u32(len as u32);
    }

    Ok(buf.split_to(len + HEADER_SIZE).freeze())
}

/// A request [`Body`] over a stream of already-framed chunks.
#[pin_project]
#[derive(Debug)]
pub(crate) struct EncodeBody<S> {
    #[pin]
    inner: S,
    is_end_stream: bool,
}

impl<S> EncodeBody<S>
where
    S: Stream<Item = Result<Bytes, Status>>,
{
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            is_end_stream: false,
        }
    }
}

impl<S> Body for EncodeBody<S>
where
    S: Stream<Item = Result<Bytes, Status>>,
{
    type Data = Bytes;
    type Error = Status;

    fn is_end_stream(&self) -> bool {
        self.is_end_stream
    }

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            // The client surfaces serialization failures to the caller
            // instead of faking trailers the way a server would.
            Some(Err(status)) => Poll::Ready(Some(Err(status))),
            None => {
                *this.is_end_stream = true;
                Poll::Ready(None)
            }
        }
    }
}
