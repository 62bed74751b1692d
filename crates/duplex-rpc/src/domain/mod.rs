//! Domain types: messages, correlation, pending calls, handlers, config, errors.

pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod pending;
pub mod registry;

pub use config::{ConfigError, RpcConfig};
pub use correlation::CorrelationId;
pub use error::{render_failure, AggregateError, RpcError, TransportError};
pub use message::{Message, Request, Response};
pub use pending::{
    CallOutcome, PendingCallGuard, PendingCallStore, PendingStats, PendingStatsSnapshot,
};
pub use registry::{BoxedHandler, HandlerRegistry};
