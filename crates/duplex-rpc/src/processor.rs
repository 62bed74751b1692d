//! # RPC Processor
//!
//! The correlation and dispatch engine for one connection.
//!
//! ## Outbound calls
//!
//! ```text
//! invoke_remote ──► pending.register ──► encode + send (write lock)
//!                                             │
//!        ┌────────────────────────────────────┘
//!        ▼
//!   timeout(call_timeout, rx) ──► response   ──► Ok(result) / RemoteError
//!                             └─► elapsed    ──► pending.expire ──► CallTimedOut
//! ```
//!
//! ## Inbound frames
//!
//! Responses complete their pending call inline on the reader path. Requests
//! never block the reader: each one takes a backlog slot and runs on its own
//! task once a dispatch permit frees up. When the backlog is full the request
//! is answered with an `Overloaded` error instead of being queued.
//!
//! Whoever removes an entry from the pending table owns its resolution. A
//! response that loses the race to the timeout is reported as an unknown id.

use crate::codec;
use crate::domain::config::RpcConfig;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{render_failure, RpcError, TransportError};
use crate::domain::message::{Message, Request, Response};
use crate::domain::pending::{PendingCallStore, PendingStatsSnapshot};
use crate::domain::registry::{BoxedHandler, HandlerRegistry};
use crate::events::{EventHub, EventSubscription, SessionEvent};
use crate::ports::FrameSink;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Inner {
    session_id: CorrelationId,
    config: RpcConfig,
    handlers: HandlerRegistry,
    pending: PendingCallStore,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    /// Held across "encode then write" so frames never interleave
    write_lock: tokio::sync::Mutex<()>,
    events: EventHub,
    /// Handlers running at once
    dispatch_permits: Arc<Semaphore>,
    /// Requests admitted (running or waiting for a dispatch permit)
    backlog: Arc<Semaphore>,
    backlog_limit: usize,
    call_timeout: RwLock<Duration>,
    verbose_errors: AtomicBool,
    closed: AtomicBool,
    connected: AtomicBool,
    disconnected: AtomicBool,
    closed_notify: Notify,
}

/// Per-connection RPC engine.
///
/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct RpcProcessor {
    inner: Arc<Inner>,
}

impl RpcProcessor {
    pub fn new(config: RpcConfig) -> Self {
        let max_concurrent = config.max_concurrent_requests.max(1);
        let backlog_limit = max_concurrent.saturating_add(config.max_queued_requests);
        Self {
            inner: Arc::new(Inner {
                session_id: CorrelationId::new(),
                handlers: HandlerRegistry::new(),
                pending: PendingCallStore::new(),
                sink: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
                events: EventHub::with_capacity(config.event_capacity),
                dispatch_permits: Arc::new(Semaphore::new(max_concurrent)),
                backlog: Arc::new(Semaphore::new(backlog_limit)),
                backlog_limit,
                call_timeout: RwLock::new(config.call_timeout),
                verbose_errors: AtomicBool::new(config.verbose_errors),
                closed: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
                closed_notify: Notify::new(),
                config,
            }),
        }
    }

    /// Identifier of this session (for logging and role bookkeeping)
    pub fn session_id(&self) -> CorrelationId {
        self.inner.session_id
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    pub fn call_timeout(&self) -> Duration {
        *self.inner.call_timeout.read()
    }

    /// Change the timeout applied to calls started from now on
    pub fn set_call_timeout(&self, timeout: Duration) {
        *self.inner.call_timeout.write() = timeout;
    }

    pub fn verbose_errors(&self) -> bool {
        self.inner.verbose_errors.load(Ordering::Relaxed)
    }

    /// Toggle full diagnostic detail in error responses
    pub fn set_verbose_errors(&self, verbose: bool) {
        self.inner.verbose_errors.store(verbose, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // Transport wiring
    // ---------------------------------------------------------------------

    /// Attach the outbound sink for this connection.
    ///
    /// Fails with `SessionClosed` after teardown and with `AlreadyConnected`
    /// while another sink is attached.
    pub fn attach_sink(&self, sink: Arc<dyn FrameSink>) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        let mut slot = self.inner.sink.lock();
        if slot.is_some() {
            return Err(TransportError::AlreadyConnected.into());
        }
        *slot = Some(sink);
        Ok(())
    }

    pub fn has_sink(&self) -> bool {
        self.inner.sink.lock().is_some()
    }

    /// Detach the outbound sink. Later sends fail with `SessionClosed`.
    pub fn detach_sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.inner.sink.lock().take()
    }

    fn current_sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.inner.sink.lock().clone()
    }

    /// Mark the transport as open. Emits `Connected` at most once.
    pub fn notify_connected(&self) {
        if self.is_closed() || self.inner.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.inner.session_id, "Session connected");
        self.inner.events.publish(SessionEvent::Connected);
    }

    /// Mark the transport as closed. Emits `Disconnected` at most once.
    pub fn notify_disconnected(&self) {
        if self.is_closed() || self.inner.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.inner.session_id, "Session disconnected");
        self.inner.events.publish(SessionEvent::Disconnected);
    }

    /// Ask the attached transport to close the connection
    pub async fn close_transport(&self, reason: Option<String>) {
        let Some(sink) = self.current_sink() else {
            return;
        };
        if let Err(e) = sink.close(reason).await {
            debug!(session_id = %self.inner.session_id, error = %e, "Transport already closed");
        }
    }

    /// Report a recoverable failure on the error signal
    pub fn report_error(&self, error: RpcError) {
        warn!(session_id = %self.inner.session_id, error = %error, "RPC session error");
        self.inner.events.publish(SessionEvent::Error(Arc::new(error)));
    }

    // ---------------------------------------------------------------------
    // Handlers
    // ---------------------------------------------------------------------

    /// Register an untyped handler under `method`.
    pub fn register(&self, method: &str, handler: BoxedHandler) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }
        self.inner.handlers.insert(method, handler)
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.inner.handlers.contains(method)
    }

    // ---------------------------------------------------------------------
    // Outbound calls
    // ---------------------------------------------------------------------

    /// Call `method` on the remote side with already-encoded parameters.
    pub async fn invoke_remote(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }

        let timeout = self.call_timeout();
        let (correlation_id, mut rx) = self.inner.pending.register(method);
        // Removes the entry if this future is dropped before it resolves
        let _guard = self.inner.pending.guard(correlation_id);

        let request = Request {
            id: correlation_id.to_string(),
            method: method.to_string(),
            params,
        };

        if let Err(e) = self.send_message(&Message::Request(request)).await {
            if let RpcError::Transport(detail) = &e {
                self.report_error(RpcError::Transport(detail.clone()));
            }
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::SessionClosed),
            Err(_) => {
                if self.inner.pending.expire(&correlation_id, timeout) {
                    Err(RpcError::CallTimedOut {
                        method: method.to_string(),
                        timeout,
                    })
                } else {
                    // A response claimed the entry just as the timer fired
                    rx.try_recv().unwrap_or(Err(RpcError::SessionClosed))
                }
            }
        }
    }

    /// Encode and write one message.
    async fn send_message(&self, message: &Message) -> Result<(), RpcError> {
        let Some(sink) = self.current_sink() else {
            return Err(RpcError::SessionClosed);
        };

        let _guard = self.inner.write_lock.lock().await;
        let frame = codec::encode(message)?;
        sink.send_frame(frame).await.map_err(RpcError::from)
    }

    // ---------------------------------------------------------------------
    // Inbound frames
    // ---------------------------------------------------------------------

    /// Process one inbound text frame.
    ///
    /// Never fails: decode problems and orphan responses go to the error
    /// signal and the connection stays usable.
    pub async fn dispatch_frame(&self, frame: &str) {
        if self.is_closed() {
            debug!(session_id = %self.inner.session_id, "Frame ignored after teardown");
            return;
        }

        let max = self.inner.config.max_frame_size;
        if frame.len() > max {
            self.report_error(RpcError::FrameTooLarge {
                size: frame.len(),
                max,
            });
            return;
        }

        match codec::decode(frame) {
            Ok(message) => self.dispatch_inbound(message).await,
            Err(e) => self.report_error(e),
        }
    }

    /// Process one decoded message.
    pub async fn dispatch_inbound(&self, message: Message) {
        match message {
            Message::Response(response) => self.complete_call(response),
            Message::Request(request) => {
                let slot = match Arc::clone(&self.inner.backlog).try_acquire_owned() {
                    Ok(slot) => slot,
                    Err(TryAcquireError::NoPermits) => {
                        self.reject_overloaded(request);
                        return;
                    }
                    // Closed by teardown
                    Err(TryAcquireError::Closed) => return,
                };

                let permits = Arc::clone(&self.inner.dispatch_permits);
                let processor = self.clone();
                tokio::spawn(async move {
                    let _slot = slot;
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let response = processor.handle_request(request).await;
                    processor.send_response(response).await;
                });
            }
        }
    }

    fn reject_overloaded(&self, request: Request) {
        let limit = self.inner.backlog_limit;
        warn!(
            session_id = %self.inner.session_id,
            method = %request.method,
            limit = limit,
            "Request backlog full, rejecting request"
        );

        let error = RpcError::Overloaded {
            method: request.method,
            limit,
        };
        let response = Response::failure(request.id, error.to_string());
        let processor = self.clone();
        tokio::spawn(async move { processor.send_response(response).await });
    }

    fn complete_call(&self, response: Response) {
        let Ok(correlation_id) = CorrelationId::parse(&response.id) else {
            self.report_error(RpcError::UnknownCorrelationId(response.id));
            return;
        };

        let outcome = response.into_result().map_err(RpcError::RemoteError);
        if !self.inner.pending.complete(correlation_id, outcome) {
            self.report_error(RpcError::UnknownCorrelationId(correlation_id.to_string()));
        }
    }

    /// Run the handler for one request and build its response.
    async fn handle_request(&self, request: Request) -> Response {
        let Request { id, method, params } = request;

        let Some(handler) = self.inner.handlers.get(&method) else {
            debug!(session_id = %self.inner.session_id, method = %method, "Unknown method");
            return Response::failure(id, RpcError::UnknownMethod(method).to_string());
        };

        let outcome = AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(failure)) => {
                debug!(
                    session_id = %self.inner.session_id,
                    method = %method,
                    error = %failure,
                    "Handler failed"
                );
                Response::failure(id, render_failure(&failure, self.verbose_errors()))
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(
                    session_id = %self.inner.session_id,
                    method = %method,
                    panic = %detail,
                    "Handler panicked"
                );
                Response::failure(id, format!("Handler for method '{method}' panicked: {detail}"))
            }
        }
    }

    async fn send_response(&self, response: Response) {
        let id = response.id.clone();
        match self.send_message(&Message::Response(response)).await {
            Ok(()) => {}
            Err(RpcError::SessionClosed) => {
                debug!(session_id = %self.inner.session_id, request_id = %id, "Response dropped (session closed)");
            }
            Err(e) => self.report_error(e),
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Subscribe to every session event published from now on
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    pub fn on_connected<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        self.inner.events.spawn_observer(move |event| {
            if matches!(event, SessionEvent::Connected) {
                callback();
            }
        })
    }

    pub fn on_disconnected<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn() + Send + 'static,
    {
        self.inner.events.spawn_observer(move |event| {
            if matches!(event, SessionEvent::Disconnected) {
                callback();
            }
        })
    }

    pub fn on_error<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<RpcError>) + Send + 'static,
    {
        self.inner.events.spawn_observer(move |event| {
            if let SessionEvent::Error(error) = event {
                callback(error);
            }
        })
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Dispose of the session. Idempotent.
    ///
    /// Clears handlers, fails every pending call with `SessionClosed`,
    /// detaches the sink and closes the event hub once queued events drain.
    pub fn teardown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.handlers.clear();
        let failed = self.inner.pending.fail_all();
        self.detach_sink();
        self.inner.dispatch_permits.close();
        self.inner.backlog.close();
        self.inner.events.close();
        self.inner.closed_notify.notify_waiters();

        info!(
            session_id = %self.inner.session_id,
            failed_calls = failed,
            "Session torn down"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the session has been torn down
    pub async fn closed(&self) {
        let notified = self.inner.closed_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    pub fn pending_stats(&self) -> PendingStatsSnapshot {
        self.inner.pending.snapshot()
    }
}

impl Default for RpcProcessor {
    fn default() -> Self {
        Self::new(RpcConfig::default())
    }
}

impl std::fmt::Debug for RpcProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcProcessor")
            .field("session_id", &self.inner.session_id)
            .field("handlers", &self.inner.handlers.len())
            .field("pending", &self.inner.pending.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
