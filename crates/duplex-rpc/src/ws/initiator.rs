//! Client role: dials an acceptor and runs one session over the connection.

use crate::adapters::channel::{ChannelSink, Outbound, DEFAULT_OUTBOUND_CAPACITY};
use crate::domain::config::RpcConfig;
use crate::domain::error::{RpcError, TransportError};
use crate::processor::RpcProcessor;
use crate::ws::DEFAULT_CLOSE_REASON;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

/// WebSocket client endpoint.
///
/// Register handlers and observers on [`processor`](Self::processor) before
/// calling [`connect`](Self::connect) so nothing the acceptor sends first is missed.
pub struct Initiator {
    processor: RpcProcessor,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Initiator {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            processor: RpcProcessor::new(config),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn processor(&self) -> &RpcProcessor {
        &self.processor
    }

    /// Open the connection and start the reader and writer tasks.
    ///
    /// An initiator carries one connection; connecting again while it is
    /// live fails with `AlreadyConnected`.
    pub async fn connect(&self, url: &str) -> Result<(), RpcError> {
        if self.processor.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        if self.processor.has_sink() {
            return Err(TransportError::AlreadyConnected.into());
        }

        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (write, read) = stream.split();

        let (sink, outbound_rx) = ChannelSink::channel(DEFAULT_OUTBOUND_CAPACITY);
        self.processor.attach_sink(Arc::new(sink))?;

        info!(
            session_id = %self.processor.session_id(),
            url = url,
            "Connected to acceptor"
        );

        let writer = tokio::spawn(write_loop(write, outbound_rx, self.processor.clone()));
        let reader = tokio::spawn(read_loop(read, self.processor.clone()));
        self.tasks.lock().extend([writer, reader]);

        self.processor.notify_connected();
        Ok(())
    }

    /// Close the connection and tear the session down.
    pub async fn close(&self, reason: Option<&str>) {
        let reason = reason.unwrap_or(DEFAULT_CLOSE_REASON).to_string();
        self.processor.close_transport(Some(reason)).await;
        self.processor.notify_disconnected();
        self.processor.teardown();
    }

    /// True until the session has been torn down
    pub fn is_connected(&self) -> bool {
        !self.processor.is_closed()
    }

    /// Wait for the reader and writer tasks to finish
    pub async fn closed(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn write_loop<S>(mut write: S, mut outbound_rx: mpsc::Receiver<Outbound>, processor: RpcProcessor)
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    while let Some(item) = outbound_rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    processor.report_error(TransportError::SendFailed(e.to_string()).into());
                    processor.notify_disconnected();
                    processor.teardown();
                    break;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.unwrap_or_default().into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "Close frame not sent");
                }
                break;
            }
        }
    }

    let _ = write.close().await;
}

async fn read_loop<S>(mut read: S, processor: RpcProcessor)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            message = read.next() => message,
            _ = processor.closed() => break,
        };
        let Some(message) = message else {
            break;
        };

        match message {
            Ok(Message::Text(text)) => processor.dispatch_frame(text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => processor.dispatch_frame(text).await,
                Err(_) => processor.report_error(RpcError::MalformedFrame("<binary>".into())),
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    session_id = %processor.session_id(),
                    frame = ?frame,
                    "Acceptor closed the connection"
                );
                break;
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => {}
            Err(e) => {
                processor.report_error(RpcError::Transport(format!("read failed: {e}")));
                break;
            }
        }
    }

    processor.notify_disconnected();
    processor.teardown();
}
