//! Outgoing control message queue

use crate::error::SinkError;
use burrow_proto::ControlMessage;
use tokio::sync::mpsc;

/// Producer side of the queue drained by the control connection writer.
///
/// Enqueueing never blocks: a full or closed queue is reported as a
/// [`SinkError`] so producers running on arbitrary threads stay usable.
#[derive(Debug, Clone)]
pub struct MessageSink {
    tx: mpsc::Sender<ControlMessage>,
}

impl MessageSink {
    pub fn new(tx: mpsc::Sender<ControlMessage>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver the writer should drain
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn send(&self, msg: ControlMessage) -> Result<(), SinkError> {
        self.tx.try_send(msg).map_err(SinkError::from)
    }

    /// Whether the consumer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
