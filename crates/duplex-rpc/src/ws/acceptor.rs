//! Server role: accepts WebSocket sessions, one processor per connection.
//!
//! Every accepted socket gets a fresh [`RpcProcessor`], handed to the
//! session initializer before any frame is read or written. The acceptor
//! keeps the live sessions so [`Acceptor::close`] can dispose of them all.

use crate::adapters::channel::{ChannelSink, Outbound, DEFAULT_OUTBOUND_CAPACITY};
use crate::domain::config::RpcConfig;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{RpcError, TransportError};
use crate::processor::RpcProcessor;
use crate::ws::DEFAULT_CLOSE_REASON;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `close` waits for the listener task to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Called with each new session's processor before it carries traffic
pub type SessionInitializer = Arc<dyn Fn(&RpcProcessor) + Send + Sync>;

type Sessions = Arc<DashMap<CorrelationId, RpcProcessor>>;

#[derive(Clone)]
struct AcceptorState {
    config: RpcConfig,
    initializer: SessionInitializer,
    sessions: Sessions,
}

/// WebSocket server endpoint
pub struct Acceptor {
    local_addr: SocketAddr,
    sessions: Sessions,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Bind `addr` and start accepting sessions on `/`.
    pub async fn bind<A, F>(addr: A, config: RpcConfig, initializer: F) -> Result<Self, RpcError>
    where
        A: ToSocketAddrs,
        F: Fn(&RpcProcessor) + Send + Sync + 'static,
    {
        config.validate()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let sessions: Sessions = Arc::new(DashMap::new());
        let state = AcceptorState {
            config,
            initializer: Arc::new(initializer),
            sessions: Arc::clone(&sessions),
        };

        let router = Router::new().route("/", get(upgrade)).with_state(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        info!(addr = %local_addr, "Starting WebSocket acceptor");
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "WebSocket acceptor failed");
            }
        });

        Ok(Self {
            local_addr,
            sessions,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            server: Mutex::new(Some(server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of this acceptor
    pub fn url(&self) -> String {
        format!("ws://{}/", self.local_addr)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Processors of all live sessions
    pub fn sessions(&self) -> Vec<RpcProcessor> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Dispose of every session, close every socket and stop listening.
    pub async fn close(&self) {
        let sessions = self.sessions();
        info!(sessions = sessions.len(), "Closing WebSocket acceptor");

        for processor in sessions {
            processor
                .close_transport(Some(DEFAULT_CLOSE_REASON.to_string()))
                .await;
            processor.notify_disconnected();
            processor.teardown();
            self.sessions.remove(&processor.session_id());
        }

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let server = self.server.lock().take();
        if let Some(server) = server {
            if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
                warn!("WebSocket acceptor did not stop within grace period");
            }
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AcceptorState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: AcceptorState) {
    let processor = RpcProcessor::new(state.config.clone());
    let session_id = processor.session_id();
    (state.initializer)(&processor);

    let (write, read) = socket.split();
    let (sink, outbound_rx) = ChannelSink::channel(DEFAULT_OUTBOUND_CAPACITY);
    if let Err(e) = processor.attach_sink(Arc::new(sink)) {
        warn!(session_id = %session_id, error = %e, "Session closed before it started");
        return;
    }

    state.sessions.insert(session_id, processor.clone());
    info!(session_id = %session_id, "Accepted WebSocket session");

    let writer = tokio::spawn(write_loop(write, outbound_rx, processor.clone()));
    processor.notify_connected();

    read_loop(read, &processor).await;

    processor.notify_disconnected();
    processor.teardown();
    state.sessions.remove(&session_id);
    let _ = writer.await;

    debug!(session_id = %session_id, "WebSocket session finished");
}

async fn write_loop<S>(mut write: S, mut outbound_rx: mpsc::Receiver<Outbound>, processor: RpcProcessor)
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(item) = outbound_rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    processor.report_error(TransportError::SendFailed(e.to_string()).into());
                    processor.notify_disconnected();
                    processor.teardown();
                    break;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
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

async fn read_loop(mut read: SplitStream<WebSocket>, processor: &RpcProcessor) {
    loop {
        let message = tokio::select! {
            message = read.next() => message,
            _ = processor.closed() => break,
        };
        let Some(message) = message else {
            break;
        };

        match message {
            Ok(Message::Text(text)) => processor.dispatch_frame(&text).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => processor.dispatch_frame(text).await,
                Err(_) => processor.report_error(RpcError::MalformedFrame("<binary>".into())),
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    session_id = %processor.session_id(),
                    frame = ?frame,
                    "Initiator closed the connection"
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                processor.report_error(RpcError::Transport(format!("read failed: {e}")));
                break;
            }
        }
    }
}
