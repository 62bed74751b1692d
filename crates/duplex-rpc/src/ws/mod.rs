//! WebSocket connection roles.
//!
//! - [`Initiator`]: opens one connection with tokio-tungstenite
//! - [`Acceptor`]: serves WebSocket upgrades on `/` with axum, one processor per session
//!
//! Both run a reader loop feeding [`RpcProcessor::dispatch_frame`] and a writer
//! task draining the session's [`ChannelSink`]. Transport failures are reported
//! on the session's error signal.
//!
//! [`RpcProcessor::dispatch_frame`]: crate::RpcProcessor::dispatch_frame
//! [`ChannelSink`]: crate::adapters::ChannelSink

pub mod acceptor;
pub mod initiator;

pub use acceptor::Acceptor;
pub use initiator::Initiator;

/// Close reason sent when a role shuts a connection down without one
pub const DEFAULT_CLOSE_REASON: &str = "closing";
