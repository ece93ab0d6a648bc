use std::fmt;

use futures_util::future;
use http::header::{ACCEPT, CONTENT_TYPE, TE, USER_AGENT};
use http::uri::{PathAndQuery, Uri};
use http::{HeaderValue, Method, Version};
use http_body::Body;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{CallOptions, GrpcCall, HttpClient, StreamWriter};
use crate::body::BoxBody;
use crate::codec::{encode_client, Codec, Decoder, EncodeBody};
use crate::metadata::{encode_timeout, GRPC_TIMEOUT_HEADER};
use crate::web::{content_types, Encoding, GrpcWebRequestBody};

const USER_AGENT_VALUE: &str = concat!("grapnel/", env!("CARGO_PKG_VERSION"));

/// Frames buffered between a [`StreamWriter`] and the request body before
/// writes start waiting on the transport.
const WRITE_BUFFER_FRAMES: usize = 4;

/// A gRPC client call invoker.
///
/// Wraps an [`HttpClient`] and starts calls of each kind over it, handing
/// back the handles appropriate to the kind: a [`GrpcCall`] for responses
/// and a [`StreamWriter`] where the client streams. The invoker selects the
/// wire protocol (native gRPC, gRPC-Web, or gRPC-Web-text) at
/// construction.
///
/// Paths follow the gRPC convention, e.g. `/greeter.Greeter/SayHello`.
pub struct Grpc<T> {
    inner: T,
    web: Option<Encoding>,
}

impl<T> Grpc<T> {
    /// A native gRPC (HTTP/2) invoker.
    pub fn new(inner: T) -> Self {
        Self { inner, web: None }
    }

    /// A gRPC-Web invoker with binary framing.
    pub fn web(inner: T) -> Self {
        Self {
            inner,
            web: Some(Encoding::None),
        }
    }

    /// A gRPC-Web-text invoker: bodies are base64 on the wire.
    pub fn web_text(inner: T) -> Self {
        Self {
            inner,
            web: Some(Encoding::Base64),
        }
    }

    /// Check if the inner client is able to accept a new request.
    pub async fn ready(&mut self) -> Result<(), T::Error>
    where
        T: HttpClient<BoxBody>,
    {
        future::poll_fn(|cx| self.inner.poll_ready(cx)).await
    }

    /// Start a unary call.
    pub fn unary<C>(
        &mut self,
        message: C::Encode,
        path: PathAndQuery,
        mut codec: C,
        options: CallOptions,
    ) -> GrpcCall<C::Decode>
    where
        T: HttpClient<BoxBody>,
        T::ResponseBody: Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::Error>,
        T::Future: Send + 'static,
        C: Codec,
    {
        let body = encode_client(
            codec.encoder(),
            futures_util::stream::iter(std::iter::once(message)),
        );
        self.start(path, BoxBody::new(body), codec.decoder(), options)
    }

    /// Start a client-streaming call: a writer plus the single-response
    /// call handle.
    pub fn client_streaming<C>(
        &mut self,
        path: PathAndQuery,
        mut codec: C,
        options: CallOptions,
    ) -> (StreamWriter<C::Encode>, GrpcCall<C::Decode>)
    where
        T: HttpClient<BoxBody>,
        T::ResponseBody: Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::Error>,
        T::Future: Send + 'static,
        C: Codec,
    {
        let (tx, rx) = mpsc::channel(WRITE_BUFFER_FRAMES);
        let body = EncodeBody::new(ReceiverStream::new(rx));
        let call = self.start(path, BoxBody::new(body), codec.decoder(), options);
        let writer = StreamWriter::new(Box::new(codec.encoder()), tx, call.shared());
        (writer, call)
    }

    /// Start a server-streaming call; the returned call handle is the
    /// message reader.
    pub fn server_streaming<C>(
        &mut self,
        message: C::Encode,
        path: PathAndQuery,
        mut codec: C,
        options: CallOptions,
    ) -> GrpcCall<C::Decode>
    where
        T: HttpClient<BoxBody>,
        T::ResponseBody: Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::Error>,
        T::Future: Send + 'static,
        C: Codec,
    {
        let body = encode_client(
            codec.encoder(),
            futures_util::stream::iter(std::iter::once(message)),
        );
        self.start(path, BoxBody::new(body), codec.decoder(), options)
    }

    /// Start a duplex-streaming call: a writer plus the message reader.
    pub fn streaming<C>(
        &mut self,
        path: PathAndQuery,
        mut codec: C,
        options: CallOptions,
    ) -> (StreamWriter<C::Encode>, GrpcCall<C::Decode>)
    where
        T: HttpClient<BoxBody>,
        T::ResponseBody: Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::Error>,
        T::Future: Send + 'static,
        C: Codec,
    {
        let (tx, rx) = mpsc::channel(WRITE_BUFFER_FRAMES);
        let body = EncodeBody::new(ReceiverStream::new(rx));
        let call = self.start(path, BoxBody::new(body), codec.decoder(), options);
        let writer = StreamWriter::new(Box::new(codec.encoder()), tx, call.shared());
        (writer, call)
    }

    fn start<D, U: 'static>(
        &mut self,
        path: PathAndQuery,
        body: BoxBody,
        decoder: D,
        options: CallOptions,
    ) -> GrpcCall<U>
    where
        T: HttpClient<BoxBody>,
        T::ResponseBody: Send + 'static,
        <T::ResponseBody as Body>::Error: Into<crate::Error>,
        T::Future: Send + 'static,
        D: Decoder<Item = U> + Send + 'static,
    {
        let body = match self.web {
            Some(Encoding::Base64) => BoxBody::new(GrpcWebRequestBody::new(body)),
            _ => body,
        };

        let mut parts = http::uri::Parts::default();
        parts.path_and_query = Some(path);
        let uri = Uri::from_parts(parts).expect("a path and query alone is a valid uri");

        let mut request = http::Request::new(body);
        *request.method_mut() = Method::POST;
        *request.uri_mut() = uri;
        // The client may downgrade to HTTP/1.1; gRPC-Web tolerates that.
        *request.version_mut() = Version::HTTP_2;

        let headers = request.headers_mut();
        options.metadata.append_to_request(headers);
        headers.insert(TE, HeaderValue::from_static("trailers"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let content_type = match self.web {
            None => content_types::GRPC,
            Some(encoding) => encoding.to_content_type(),
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(encoding) = self.web {
            headers.insert(ACCEPT, HeaderValue::from_static(encoding.to_content_type()));
        }

        // grpc-timeout is recomputed from the deadline on every invocation,
        // never forwarded from caller metadata.
        if let Some(deadline) = options.deadline {
            let timeout = deadline.saturating_duration_since(tokio::time::Instant::now());
            headers.insert(GRPC_TIMEOUT_HEADER, encode_timeout(timeout));
        }

        GrpcCall::start(&mut self.inner, request, decoder, &options, self.web)
    }
}

impl<T: Clone> Clone for Grpc<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            web: self.web,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Grpc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grpc").field("inner", &self.inner).finish()
    }
}
