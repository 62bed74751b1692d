// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Duplex-RPC - symmetric request/response calls over one persistent connection.
//!
//! Either endpoint may register methods and call methods on the other side.
//! The role (initiator or acceptor) only decides who opens the connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RpcProcessor (per session)               │
//! │                                                              │
//! │  typed::on / on_sync           typed::call                   │
//! │        │                            │                        │
//! │  ┌─────┴───────────┐         ┌──────┴────────────┐           │
//! │  │ HandlerRegistry │         │ PendingCallStore  │           │
//! │  │ (DashMap)       │         │ (DashMap+oneshot) │           │
//! │  └─────┬───────────┘         └──────┬────────────┘           │
//! │        │ request                    │ response               │
//! │  ┌─────┴────────────────────────────┴────────────┐           │
//! │  │            codec ("req" / "res" + JSON)       │           │
//! │  └─────────────────────┬─────────────────────────┘           │
//! └────────────────────────┼─────────────────────────────────────┘
//!                          │ FrameSink / dispatch_frame
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!   ws::Initiator     ws::Acceptor     adapters::memory
//!  (tungstenite)        (axum)          (tokio mpsc)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use duplex_rpc::{Acceptor, Initiator, RpcConfig};
//!
//! let acceptor = Acceptor::bind("127.0.0.1:0", RpcConfig::default(), |session| {
//!     let _ = session.on("Add", |a: i64, b: i64| async move { Ok::<_, anyhow::Error>(a + b) });
//! })
//! .await?;
//!
//! let client = Initiator::new(RpcConfig::default());
//! client.connect(&acceptor.url()).await?;
//! let sum: i64 = client.processor().call("Add", (10, 301)).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod codec;
pub mod domain;
pub mod events;
pub mod ports;
pub mod processor;
pub mod typed;
pub mod ws;

// Re-export main types
pub use domain::{
    AggregateError, ConfigError, CorrelationId, Message, PendingStatsSnapshot, Request, Response,
    RpcConfig, RpcError, TransportError,
};
pub use events::{EventSubscription, SessionEvent};
pub use ports::FrameSink;
pub use processor::RpcProcessor;
pub use typed::{Handler, IntoParams, SyncHandler};
pub use ws::{Acceptor, Initiator};
