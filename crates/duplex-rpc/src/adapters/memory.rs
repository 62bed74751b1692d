//! In-process transport: two processors joined by tokio channels.
//!
//! Each direction has its own pump task that feeds frames into the peer's
//! `dispatch_frame`. When either side is torn down its sink is dropped, the
//! pump sees the channel close and tears down the other side too.

use crate::adapters::channel::{ChannelSink, Outbound, DEFAULT_OUTBOUND_CAPACITY};
use crate::domain::config::RpcConfig;
use crate::domain::error::RpcError;
use crate::processor::RpcProcessor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Create two connected processors sharing `config`.
///
/// Must be called from within a tokio runtime.
pub fn pair(config: RpcConfig) -> (RpcProcessor, RpcProcessor) {
    let left = RpcProcessor::new(config.clone());
    let right = RpcProcessor::new(config);
    // Fresh processors are never closed
    let _ = connect(&left, &right);
    (left, right)
}

/// Join two processors so each one's outbound frames reach the other.
pub fn connect(left: &RpcProcessor, right: &RpcProcessor) -> Result<(), RpcError> {
    let (left_sink, left_rx) = ChannelSink::channel(DEFAULT_OUTBOUND_CAPACITY);
    let (right_sink, right_rx) = ChannelSink::channel(DEFAULT_OUTBOUND_CAPACITY);

    left.attach_sink(Arc::new(left_sink))?;
    right.attach_sink(Arc::new(right_sink))?;

    tokio::spawn(pump(left_rx, right.clone(), left.clone()));
    tokio::spawn(pump(right_rx, left.clone(), right.clone()));

    left.notify_connected();
    right.notify_connected();
    Ok(())
}

/// Deliver frames written by `from` into `to` until the link closes.
async fn pump(mut rx: mpsc::Receiver<Outbound>, to: RpcProcessor, from: RpcProcessor) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => to.dispatch_frame(&frame).await,
            Outbound::Close(reason) => {
                debug!(
                    session_id = %from.session_id(),
                    reason = reason.as_deref().unwrap_or(""),
                    "In-memory link closed"
                );
                break;
            }
        }
    }

    for side in [&to, &from] {
        side.notify_disconnected();
        side.teardown();
    }
}
