use http::StatusCode;

use crate::buffer::Batch;
use crate::sender::{SendError, Sender};

/// A sender that forwards every batch to a channel instead of the network.
pub struct ChannelSender {
    batches: tokio::sync::mpsc::UnboundedSender<Batch>,
    fail: bool,
}

impl ChannelSender {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                batches: tx,
                fail: false,
            },
            rx,
        )
    }

    /// Records batches like `new`, but reports every send as failed.
    pub fn failing() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Batch>) {
        let (mut sender, rx) = Self::new();
        sender.fail = true;
        (sender, rx)
    }
}

#[async_trait::async_trait]
impl Sender for ChannelSender {
    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        let _ = self.batches.send(batch);
        if self.fail {
            return Err(SendError::UnexpectedStatus(StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(())
    }
}
