//! HTTP body utilities.

use bytes::{Buf, Bytes};
use http_body::Body;
use http_body_util::BodyExt;

use crate::Status;

/// A type-erased HTTP body with [`Status`] errors, used for both request and
/// response bodies of a call.
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, Status>;

/// Erases a body's data and error types, contiguizing each data frame.
///
/// Transport-level body failures surface as `Unavailable`; the call object
/// upgrades them to `DeadlineExceeded` when its timer has already fired.
pub fn box_body<B>(body: B) -> BoxBody
where
    B: Body + Send + 'static,
    B::Data: Buf,
    B::Error: Into<crate::Error>,
{
    body.map_frame(|frame| frame.map_data(|mut data| data.copy_to_bytes(data.remaining())))
        .map_err(|err| Status::from_transport_error(err.into()))
        .boxed_unsync()
}

/// An empty body, used for trailers-only responses.
pub fn empty_body() -> BoxBody {
    http_body_util::Empty::new()
        .map_err(|err| match err {})
        .boxed_unsync()
}
