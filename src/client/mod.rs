//! The client call core: invoker, per-call state machine, and stream
//! handles.

mod call;
mod grpc;
mod writer;

pub use self::call::GrpcCall;
pub use self::grpc::Grpc;
pub use self::writer::StreamWriter;

use std::future::Future;
use std::task::{Context, Poll};

use http_body::Body;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use crate::metadata::MetadataMap;

/// The request-response facility calls are driven over.
///
/// Anything implementing [`tower_service::Service`] over HTTP requests gets
/// this for free. The client owns connection management; the call core only
/// needs `send` to resolve once response headers arrive and the response
/// body to stream.
pub trait HttpClient<ReqBody> {
    /// Response body given by the client.
    type ResponseBody: Body;
    /// Errors produced by the client.
    type Error: Into<crate::Error>;
    /// The future response value.
    type Future: Future<Output = Result<http::Response<Self::ResponseBody>, Self::Error>>;

    /// Returns `Ready` when the client is able to process another request.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>>;

    /// Process the request and return the response asynchronously.
    fn send(&mut self, request: http::Request<ReqBody>) -> Self::Future;
}

impl<T, ReqBody, ResBody> HttpClient<ReqBody> for T
where
    T: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    T::Error: Into<crate::Error>,
    ResBody: Body,
{
    type ResponseBody = ResBody;
    type Error = T::Error;
    type Future = T::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Service::poll_ready(self, cx)
    }

    fn send(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        Service::call(self, request)
    }
}

/// Per-call options: caller metadata, deadline, external cancellation, and
/// receive limits.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub(crate) metadata: MetadataMap,
    pub(crate) deadline: Option<tokio::time::Instant>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) max_receive_message_size: Option<usize>,
}

impl CallOptions {
    pub fn new() -> Self {
        CallOptions::default()
    }

    /// Attach caller metadata, sent as request headers.
    ///
    /// `grpc-timeout` is never forwarded from here; the call computes it
    /// from the deadline on every invocation.
    pub fn metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Absolute instant past which the call must have completed.
    pub fn deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Convenience for `deadline(now + timeout)`.
    pub fn timeout(self, timeout: std::time::Duration) -> Self {
        self.deadline(tokio::time::Instant::now() + timeout)
    }

    /// External cancellation: when this token fires the call is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Reject incoming messages larger than this many bytes.
    pub fn max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = Some(limit);
        self
    }
}
