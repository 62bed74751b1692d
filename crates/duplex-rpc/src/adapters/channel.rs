//! Channel-backed [`FrameSink`].
//!
//! Frames are queued to a single writer task that owns the transport's write
//! half, so writes to the socket never interleave.

use crate::domain::error::TransportError;
use crate::ports::FrameSink;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Default queued outbound frames per connection
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Item consumed by a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close(Option<String>),
}

/// Sink that forwards frames to a writer task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, reason: Option<String>) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Close(reason))
            .await
            .map_err(|_| TransportError::Closed)
    }
}
