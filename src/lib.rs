//! A gRPC and gRPC-Web client call core over a generic HTTP transport.
//!
//! `grapnel` drives typed RPC invocations (unary, client-streaming,
//! server-streaming, and duplex) over any request-response facility that
//! can send an HTTP request with a streaming body (see
//! [`client::HttpClient`]). It enforces gRPC framing and headers, honors
//! per-call deadlines and external cancellation, and surfaces trailer-based
//! status back to the caller. In gRPC-Web mode it re-encodes the byte
//! stream (base64 for the *text* variant) and parses the trailers frame
//! embedded in the response body.
//!
//! What this crate deliberately does not do: connection management, code
//! generation, load balancing, retries, TLS, compression, or the server
//! side. Message serialization is opaque, supplied through a
//! [`codec::Codec`].
//!
//! # Example
//!
//! ```ignore
//! let mut grpc = Grpc::new(http_client);
//! let mut call = grpc.unary(
//!     request_bytes,
//!     PathAndQuery::from_static("/greeter.Greeter/SayHello"),
//!     BytesCodec,
//!     CallOptions::new().timeout(Duration::from_secs(5)),
//! );
//! let reply = call.response().await?;
//! ```

pub mod body;
pub mod client;
pub mod codec;
pub mod metadata;
pub mod web;

mod error;
mod status;
mod util;

#[cfg(test)]
mod testing;

pub use crate::body::BoxBody;
pub use crate::client::{CallOptions, Grpc, GrpcCall, HttpClient, StreamWriter};
pub use crate::codec::{BytesCodec, Codec, Streaming};
pub use crate::error::{CallError, Error};
pub use crate::metadata::MetadataMap;
pub use crate::status::{Code, Status};
pub use crate::web::Encoding;
