use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::StatusCode;
use http_body::Body;
use http_body_util::BodyExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{CallOptions, HttpClient};
use crate::body::{box_body, empty_body, BoxBody};
use crate::codec::{Decoder, Streaming};
use crate::metadata::MetadataMap;
use crate::web::{content_types, Encoding, GrpcWebResponseBody};
use crate::{CallError, Code, Status};

const PHASE_RUNNING: u8 = 0;
const PHASE_FINISHED: u8 = 1;
const PHASE_DEADLINE: u8 = 2;

/// State shared between a call, its deadline timer, and its stream handles.
///
/// The phase advances exactly once, by compare-and-swap, so the timer and
/// the finish path race safely: a deadline can never be recorded after the
/// response finished, and observers always agree on why the call ended.
pub(crate) struct CallShared {
    cancel: CancellationToken,
    phase: AtomicU8,
}

impl CallShared {
    fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(CallShared {
            cancel,
            phase: AtomicU8::new(PHASE_RUNNING),
        })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_FINISHED
    }

    pub(crate) fn deadline_reached(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_DEADLINE
    }

    /// The status an interrupted operation surfaces: the deadline wins over
    /// plain cancellation whenever the timer fired first.
    pub(crate) fn cancellation_status(&self) -> Status {
        if self.deadline_reached() {
            Status::deadline_exceeded("Deadline Exceeded")
        } else {
            Status::cancelled("call was cancelled")
        }
    }

    fn mark_deadline(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_RUNNING,
                PHASE_DEADLINE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn mark_finished(&self) -> bool {
        self.phase
            .compare_exchange(
                PHASE_RUNNING,
                PHASE_FINISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

type SendFuture = Pin<Box<dyn Future<Output = Result<http::Response<BoxBody>, Status>> + Send>>;

enum State<T> {
    /// Request in flight; headers not yet validated.
    Sending(SendFuture),
    /// Headers validated; the body is readable.
    Active(Streaming<T>),
    /// The response finished (status resolved) or was consumed.
    Finished,
    /// Terminal failure, re-surfaced by every later operation.
    Failed(Status),
}

/// A single RPC invocation.
///
/// Owns the request lifecycle end to end: the in-flight send, header
/// validation, the deadline timer, cancellation, the response stream, and
/// trailer-based status resolution. Reads happen through [`message`] for
/// streaming calls or [`response`] for single-response calls; [`dispose`]
/// (also run on drop) tears the call down and is idempotent.
///
/// [`message`]: GrpcCall::message
/// [`response`]: GrpcCall::response
/// [`dispose`]: GrpcCall::dispose
pub struct GrpcCall<T: 'static> {
    state: State<T>,
    decoder: Option<Box<dyn Decoder<Item = T> + Send + 'static>>,
    shared: Arc<CallShared>,
    web: Option<Encoding>,
    max_receive_message_size: Option<usize>,
    headers: Option<MetadataMap>,
    trailers: Option<MetadataMap>,
    status: Option<Status>,
    timer: Option<JoinHandle<()>>,
    disposed: bool,
}

impl<T: 'static> GrpcCall<T> {
    pub(crate) fn start<C, D>(
        client: &mut C,
        request: http::Request<BoxBody>,
        decoder: D,
        options: &CallOptions,
        web: Option<Encoding>,
    ) -> Self
    where
        C: HttpClient<BoxBody>,
        C::ResponseBody: Send + 'static,
        <C::ResponseBody as Body>::Error: Into<crate::Error>,
        C::Future: Send + 'static,
        D: Decoder<Item = T> + Send + 'static,
    {
        // A child of the external token: external fire propagates in,
        // internal fire stays local, and dropping the child releases the
        // registration.
        let cancel = match &options.cancellation {
            Some(external) => external.child_token(),
            None => CancellationToken::new(),
        };
        let shared = CallShared::new(cancel);

        let send = client.send(request);
        let send: SendFuture = Box::pin(async move {
            match send.await {
                Ok(response) => Ok(response.map(box_body)),
                Err(err) => Err(Status::from_transport_error(err.into())),
            }
        });

        let timer = options.deadline.map(|deadline| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if shared.mark_deadline() {
                    debug!("deadline expired, cancelling call");
                    shared.cancel.cancel();
                }
            })
        });

        GrpcCall {
            state: State::Sending(send),
            decoder: Some(Box::new(decoder)),
            shared,
            web,
            max_receive_message_size: options.max_receive_message_size,
            headers: None,
            trailers: None,
            status: None,
            timer,
            disposed: false,
        }
    }

    pub(crate) fn shared(&self) -> Arc<CallShared> {
        Arc::clone(&self.shared)
    }

    /// Whether the deadline timer fired before the call completed.
    pub fn deadline_reached(&self) -> bool {
        self.shared.deadline_reached()
    }

    /// Response headers, available as soon as the HTTP response arrives and
    /// independent of body state. Binary (`-bin`) values decode on access
    /// through [`MetadataMap::get_bin`].
    pub async fn response_headers(&mut self) -> Result<MetadataMap, CallError> {
        self.ensure_active().await?;
        match &self.headers {
            Some(headers) => Ok(headers.clone()),
            None => Err(CallError::InvalidOperation(
                "headers were released when the call was disposed",
            )),
        }
    }

    /// The single response message of a unary or client-streaming call.
    ///
    /// Resolves trailers and raises the peer's status first, so a non-OK
    /// call surfaces its real status rather than a missing message.
    pub async fn response(&mut self) -> Result<T, CallError> {
        self.ensure_active().await?;
        if !matches!(self.state, State::Active(_)) {
            return Err(CallError::InvalidOperation(
                "response was already consumed",
            ));
        }

        match self.read_message(None).await? {
            None => {
                self.finish_response().await?;
                Err(CallError::Status(Status::internal(
                    "Missing response message.",
                )))
            }
            Some(message) => {
                if self.read_message(None).await?.is_some() {
                    return Err(CallError::Status(self.fail(Status::internal(
                        "expected a single response message",
                    ))));
                }
                self.finish_response().await?;
                Ok(message)
            }
        }
    }

    /// The next message of a server-streaming or duplex call.
    ///
    /// `Ok(None)` marks end-of-stream; at that point trailers have been
    /// read, the call's status resolved, and a non-OK status raised.
    pub async fn message(&mut self) -> Result<Option<T>, CallError> {
        self.next(None).await
    }

    /// Like [`message`], but additionally interruptible by a caller-owned
    /// token. Firing it fails this read with `Cancelled` without tearing
    /// down the call.
    ///
    /// [`message`]: GrpcCall::message
    pub async fn message_with_cancellation(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, CallError> {
        self.next(Some(cancel)).await
    }

    /// Trailing metadata. Usable only once the call has completed.
    pub fn trailers(&self) -> Result<MetadataMap, CallError> {
        if let State::Failed(status) = &self.state {
            return Err(status.clone().into());
        }
        match (&self.trailers, &self.status) {
            (Some(trailers), Some(_)) => Ok(trailers.clone()),
            _ => Err(CallError::InvalidOperation(
                "trailers are not available until the call completes",
            )),
        }
    }

    /// The call's resolved status. Usable only once the call has completed.
    pub fn status(&self) -> Result<Status, CallError> {
        self.status.clone().ok_or(CallError::InvalidOperation(
            "status is not available until the call completes",
        ))
    }

    /// Tear the call down, cancelling all in-flight work if the response
    /// has not finished. Idempotent; also run on drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if self.status.is_none() {
            trace!("call disposed before completion");
            self.shared.mark_finished();
            self.shared.cancel.cancel();
            let status = self.shared.cancellation_status();
            self.status = Some(status.clone());
            self.state = State::Failed(status);
        } else if !matches!(self.state, State::Failed(_)) {
            self.state = State::Finished;
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.decoder = None;
    }

    /// Drives the in-flight send to completion and validates headers.
    async fn ensure_active(&mut self) -> Result<(), Status> {
        let send = match &mut self.state {
            State::Sending(send) => send,
            State::Active(_) | State::Finished => return Ok(()),
            State::Failed(status) => return Err(status.clone()),
        };

        let shared = Arc::clone(&self.shared);
        let result = tokio::select! {
            biased;

            _ = shared.cancelled() => Err(shared.cancellation_status()),
            result = send.as_mut() => result,
        };

        match result.and_then(|response| self.validate_response(response)) {
            Ok(()) => Ok(()),
            Err(status) => {
                let status = self.map_stream_status(status);
                Err(self.fail(status))
            }
        }
    }

    fn validate_response(&mut self, response: http::Response<BoxBody>) -> Result<(), Status> {
        let (parts, body) = response.into_parts();

        if parts.status != StatusCode::OK {
            return Err(Status::internal(format!(
                "Bad gRPC response. Expected HTTP status code 200. Got status code: {}",
                parts.status.as_u16()
            )));
        }

        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .ok_or_else(|| {
                Status::internal("Bad gRPC response. Response did not have a content-type header.")
            })?
            .to_str()
            .map_err(|_| Status::internal("Bad gRPC response. Invalid content-type header."))?;

        let expected = match self.web {
            None => content_types::GRPC,
            Some(_) => content_types::GRPC_WEB,
        };
        if !content_type.starts_with(expected) {
            return Err(Status::internal(format!(
                "Bad gRPC response. Unexpected content-type: {}",
                content_type
            )));
        }

        // Trailers-only: the server resolved the whole call inside the
        // header block and the body is empty.
        let trailers_only = Status::try_from_header_map(&parts.headers)?.is_some();

        let decoder = self
            .decoder
            .take()
            .expect("decoder is present until the response arrives");

        let streaming = if trailers_only {
            self.trailers = Some(MetadataMap::from_headers(parts.headers.clone()));
            Streaming::new(decoder, empty_body(), self.max_receive_message_size)
        } else {
            let body = match self.web {
                None => body,
                Some(_) => {
                    let encoding = Encoding::from_content_type(&parts.headers);
                    GrpcWebResponseBody::new(body, encoding).boxed_unsync()
                }
            };
            Streaming::new(decoder, body, self.max_receive_message_size)
        };

        self.headers = Some(MetadataMap::from_headers(parts.headers));
        self.state = State::Active(streaming);
        trace!("response headers validated");
        Ok(())
    }

    async fn next(
        &mut self,
        extra: Option<&CancellationToken>,
    ) -> Result<Option<T>, CallError> {
        self.ensure_active().await?;
        if matches!(self.state, State::Finished) {
            return Ok(None);
        }

        match self.read_message(extra).await? {
            Some(message) => Ok(Some(message)),
            None => {
                self.finish_response().await?;
                Ok(None)
            }
        }
    }

    /// One raw read off the response stream, interruptible by the call's
    /// cancellation and an optional caller token.
    async fn read_message(
        &mut self,
        extra: Option<&CancellationToken>,
    ) -> Result<Option<T>, CallError> {
        enum Read<T> {
            Message(Result<Option<T>, Status>),
            CallCancelled,
            ReaderCancelled,
        }

        let stream = match &mut self.state {
            State::Active(stream) => stream,
            _ => return Ok(None),
        };
        let shared = Arc::clone(&self.shared);

        let read = match extra {
            Some(token) => tokio::select! {
                biased;

                _ = shared.cancelled() => Read::CallCancelled,
                _ = token.cancelled() => Read::ReaderCancelled,
                result = stream.message() => Read::Message(result),
            },
            None => tokio::select! {
                biased;

                _ = shared.cancelled() => Read::CallCancelled,
                result = stream.message() => Read::Message(result),
            },
        };

        match read {
            Read::Message(Ok(message)) => Ok(message),
            Read::Message(Err(status)) => {
                let status = self.map_stream_status(status);
                Err(self.fail(status).into())
            }
            Read::CallCancelled => {
                let status = self.shared.cancellation_status();
                Err(self.fail(status).into())
            }
            Read::ReaderCancelled => Err(Status::cancelled("read was cancelled").into()),
        }
    }

    /// Resolves trailers and status once the body is drained; raises a
    /// non-OK status exactly once and releases the call's resources.
    async fn finish_response(&mut self) -> Result<(), CallError> {
        let stream = match std::mem::replace(&mut self.state, State::Finished) {
            State::Active(stream) => Some(stream),
            other => {
                self.state = other;
                None
            }
        };

        let trailers = match self.trailers.take() {
            Some(trailers) => Some(trailers),
            None => match stream {
                Some(mut stream) => match stream.trailers().await {
                    Ok(trailers) => trailers,
                    Err(status) => {
                        let status = self.map_stream_status(status);
                        return Err(self.fail(status).into());
                    }
                },
                None => None,
            },
        };

        self.shared.mark_finished();

        let status = match trailers.as_ref() {
            Some(map) => match Status::try_from_header_map(map.as_headers()) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    return Err(self
                        .fail(Status::internal(
                            "protocol error: response is missing grpc-status",
                        ))
                        .into());
                }
                Err(protocol) => return Err(self.fail(protocol).into()),
            },
            None => {
                return Err(self
                    .fail(Status::internal(
                        "protocol error: response stream ended without trailers",
                    ))
                    .into());
            }
        };

        self.trailers = trailers;
        self.status = Some(status.clone());
        self.dispose();

        if status.code() != Code::Ok {
            debug!("call finished with non-OK status: {:?}", status);
            return Err(status.into());
        }
        Ok(())
    }

    /// Records a terminal failure: cancels in-flight work, caches the
    /// status for re-surfacing, and releases resources.
    fn fail(&mut self, status: Status) -> Status {
        self.shared.mark_finished();
        self.shared.cancel.cancel();
        self.status = Some(status.clone());
        self.state = State::Failed(status.clone());
        self.dispose();
        status
    }

    /// Transport-flavored errors observed after the deadline fired report
    /// the deadline, not the collateral damage.
    fn map_stream_status(&self, status: Status) -> Status {
        if self.shared.deadline_reached()
            && matches!(status.code(), Code::Unavailable | Code::Cancelled)
        {
            Status::deadline_exceeded("Deadline Exceeded")
        } else {
            status
        }
    }
}

impl<T: 'static> Drop for GrpcCall<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T> fmt::Debug for GrpcCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Sending(_) => "Sending",
            State::Active(_) => "Active",
            State::Finished => "Finished",
            State::Failed(_) => "Failed",
        };
        f.debug_struct("GrpcCall")
            .field("state", &state)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
static_assertions::assert_impl_all!(GrpcCall<bytes::Bytes>: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_wins_the_phase_race() {
        let shared = CallShared::new(CancellationToken::new());
        assert!(shared.mark_deadline());
        assert!(!shared.mark_finished());
        assert!(shared.deadline_reached());
        assert_eq!(
            shared.cancellation_status().code(),
            Code::DeadlineExceeded
        );
    }

    #[test]
    fn finish_blocks_a_later_deadline() {
        let shared = CallShared::new(CancellationToken::new());
        assert!(shared.mark_finished());
        assert!(!shared.mark_deadline());
        assert!(!shared.deadline_reached());
        assert_eq!(shared.cancellation_status().code(), Code::Cancelled);
    }

    #[test]
    fn phase_transitions_are_one_shot() {
        let shared = CallShared::new(CancellationToken::new());
        assert!(shared.mark_deadline());
        assert!(!shared.mark_deadline());
    }
}
