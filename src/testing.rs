//! Small helpers shared by unit tests.

use bytes::Bytes;
use http::HeaderMap;
use http_body::Frame;
use http_body_util::StreamBody;

use crate::body::{box_body, BoxBody};
use crate::Status;

pub(crate) fn data_frame(bytes: &[u8]) -> Frame<Bytes> {
    Frame::data(Bytes::copy_from_slice(bytes))
}

pub(crate) fn trailers_frame(map: HeaderMap) -> Frame<Bytes> {
    Frame::trailers(map)
}

pub(crate) fn mock_body(frames: Vec<Result<Frame<Bytes>, Status>>) -> BoxBody {
    box_body(StreamBody::new(futures_util::stream::iter(frames)))
}
