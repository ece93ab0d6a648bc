use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use super::call::CallShared;
use crate::codec::{encode_frame, Encoder};
use crate::{CallError, Status};

/// Write half of a client-streaming or duplex call.
///
/// Each [`write`] serializes one message as a frame and hands it to the
/// request body; [`complete`] ends the body. The writer holds no reference
/// to the call itself, only the shared cancellation state, so it stays safe
/// to use after the call is torn down (writes then fail with the call's
/// cancellation status).
///
/// [`write`]: StreamWriter::write
/// [`complete`]: StreamWriter::complete
pub struct StreamWriter<T> {
    encoder: Box<dyn Encoder<Item = T> + Send + 'static>,
    tx: Option<mpsc::Sender<Result<Bytes, Status>>>,
    buf: BytesMut,
    shared: Arc<CallShared>,
}

impl<T> StreamWriter<T> {
    pub(crate) fn new(
        encoder: Box<dyn Encoder<Item = T> + Send + 'static>,
        tx: mpsc::Sender<Result<Bytes, Status>>,
        shared: Arc<CallShared>,
    ) -> Self {
        Self {
            encoder,
            tx: Some(tx),
            buf: BytesMut::new(),
            shared,
        }
    }

    /// Serialize and send one message, waiting for body capacity.
    ///
    /// Fails with `Cancelled` or `DeadlineExceeded` once the call is torn
    /// down, and with an invalid-operation error after [`complete`].
    ///
    /// [`complete`]: StreamWriter::complete
    pub async fn write(&mut self, message: T) -> Result<(), CallError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or(CallError::InvalidOperation("write after complete"))?;

        if self.shared.is_cancelled() {
            return Err(self.shared.cancellation_status().into());
        }
        if self.shared.is_finished() {
            return Err(CallError::InvalidOperation(
                "write after the call completed",
            ));
        }

        let frame = encode_frame(&mut self.encoder, &mut self.buf, message)?;

        tokio::select! {
            biased;

            _ = self.shared.cancelled() => Err(self.shared.cancellation_status().into()),
            sent = tx.send(Ok(frame)) => sent.map_err(|_| {
                // The receiving body is gone: the call finished or was
                // disposed underneath us.
                if self.shared.is_cancelled() {
                    CallError::Status(self.shared.cancellation_status())
                } else {
                    CallError::InvalidOperation("write after the call completed")
                }
            }),
        }
    }

    /// Signal that no further messages will be written, letting the HTTP
    /// request body end. Idempotent.
    pub fn complete(&mut self) {
        self.tx = None;
    }

    /// Whether [`complete`] has been called.
    ///
    /// [`complete`]: StreamWriter::complete
    pub fn is_complete(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> fmt::Debug for StreamWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("complete", &self.is_complete())
            .finish()
    }
}
