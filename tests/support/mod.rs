//! A channel- and closure-backed mock transport for driving calls without a
//! real HTTP client.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use tower_service::Service;

use grapnel::body::{box_body, BoxBody};
use grapnel::Status;

pub type ResponseFuture =
    Pin<Box<dyn Future<Output = Result<http::Response<BoxBody>, Status>> + Send>>;

/// An HTTP client whose behavior is the given handler closure.
pub struct MockClient<F> {
    handler: F,
}

impl<F> MockClient<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Service<http::Request<BoxBody>> for MockClient<F>
where
    F: FnMut(http::Request<BoxBody>) -> ResponseFuture,
{
    type Response = http::Response<BoxBody>;
    type Error = Status;
    type Future = ResponseFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Status>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<BoxBody>) -> ResponseFuture {
        (self.handler)(request)
    }
}

/// One `flag | len | payload` message frame.
pub fn message_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(5 + payload.len());
    frame.put_u8(0);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

pub fn ok_trailers() -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert("grpc-status", HeaderValue::from_static("0"));
    map
}

pub fn trailers_with_status(code: &'static str, message: Option<&'static str>) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert("grpc-status", HeaderValue::from_static(code));
    if let Some(message) = message {
        map.insert("grpc-message", HeaderValue::from_static(message));
    }
    map
}

pub fn body_from(frames: Vec<Result<Frame<Bytes>, Status>>) -> BoxBody {
    box_body(StreamBody::new(futures_util::stream::iter(frames)))
}

/// A body that yields the given frames and then stays pending forever.
pub fn stalled_body(frames: Vec<Result<Frame<Bytes>, Status>>) -> BoxBody {
    use futures_util::StreamExt;
    box_body(StreamBody::new(
        futures_util::stream::iter(frames).chain(futures_util::stream::pending()),
    ))
}

pub fn response(content_type: &str, body: BoxBody) -> http::Response<BoxBody> {
    let mut response = http::Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
    response
}

/// A plain `application/grpc` response over the given frames.
pub fn grpc_response(frames: Vec<Result<Frame<Bytes>, Status>>) -> http::Response<BoxBody> {
    response("application/grpc", body_from(frames))
}

pub fn http_error_response(status: StatusCode) -> http::Response<BoxBody> {
    let mut response = grpc_response(vec![]);
    *response.status_mut() = status;
    response
}

pub fn ready(response: http::Response<BoxBody>) -> ResponseFuture {
    Box::pin(async move { Ok(response) })
}

/// A send future that never resolves (server never answers).
pub fn never() -> ResponseFuture {
    Box::pin(futures_util::future::pending())
}
