//! Generic message encoding and decoding over the gRPC wire format.
//!
//! Serialization is opaque to the call core: a [`Codec`] supplies an
//! [`Encoder`] and [`Decoder`] pair that convert between typed messages and
//! bytes, and this module handles the length-prefixed framing around them.

mod buffer;
mod decode;
mod encode;

pub use self::buffer::{DecodeBuf, EncodeBuf};
pub use self::decode::Streaming;
pub(crate) use self::encode::{encode_client, encode_frame, EncodeBody};

use bytes::{Buf, BufMut, Bytes};

use crate::Status;

/// Size of the gRPC frame header: 1-byte flag + 4-byte big-endian length.
pub(crate) const HEADER_SIZE: usize = 5;

/// Trait that knows how to encode and decode gRPC messages.
pub trait Codec: Default {
    /// The encodable message.
    type Encode: Send + 'static;
    /// The decodable message.
    type Decode: Send + 'static;

    /// The encoder that can encode a message.
    type Encoder: Encoder<Item = Self::Encode> + Send + 'static;
    /// The decoder that can decode a message.
    type Decoder: Decoder<Item = Self::Decode> + Send + 'static;

    /// Fetch the encoder.
    fn encoder(&mut self) -> Self::Encoder;
    /// Fetch the decoder.
    fn decoder(&mut self) -> Self::Decoder;
}

/// Serializes one message into an outgoing frame body.
///
/// Failures should carry `Code::Internal`; they abort the call.
pub trait Encoder {
    /// The message understood by this encoder.
    type Item;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Status>;
}

/// Deserializes one message from a received frame payload.
///
/// The decoder must consume the buffer exactly; failures should carry
/// `Code::Internal`.
pub trait Decoder {
    /// The message produced by this decoder.
    type Item;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Self::Item, Status>;
}

impl<T> Encoder for Box<dyn Encoder<Item = T> + Send + 'static> {
    type Item = T;

    fn encode(&mut self, item: T, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        (**self).encode(item, dst)
    }
}

impl<T> Decoder for Box<dyn Decoder<Item = T> + Send + 'static> {
    type Item = T;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<T, Status> {
        (**self).decode(src)
    }
}

/// An identity codec passing raw message bytes through unchanged.
#[derive(Debug, Clone, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Bytes;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Bytes;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Bytes, Status> {
        Ok(src.copy_to_bytes(src.remaining()))
    }
}
