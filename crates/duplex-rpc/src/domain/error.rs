//! Error taxonomy for the RPC layer.
//!
//! Display strings for the per-call variants match what the remote side
//! expects to read in an error response, so they are part of the wire
//! contract.

use crate::domain::config::ConfigError;
use std::fmt;
use std::time::Duration;

/// Errors produced by the codec, the correlation engine and the typed adapter.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Frame tag missing, too short or not recognised
    #[error("Unsupported message type: '{0}'")]
    MalformedFrame(String),

    /// Frame body does not parse into the shape implied by its tag
    #[error("Malformed '{tag}' payload: {source}")]
    MalformedPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Inbound frame exceeds the configured size limit
    #[error("Message too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A handler is already registered under this name
    #[error("Duplicate RPC handler '{0}'")]
    DuplicateHandler(String),

    /// Inbound parameter count differs from the handler signature
    #[error("Method '{method}' requires {expected} arguments")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    /// A positional parameter could not be decoded. `index` is zero-based.
    #[error("Argument {} for method '{method}' must be of type '{expected_type}'", .index + 1)]
    ParameterTypeMismatch {
        index: usize,
        method: String,
        expected_type: &'static str,
    },

    /// The returned value could not be decoded into the caller's type
    #[error("Return value for method '{method}' must be of type '{expected_type}'")]
    ReturnTypeMismatch {
        method: String,
        expected_type: &'static str,
    },

    /// A value could not be encoded into a structured value
    #[error("Failed to encode value for method '{method}': {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// No response arrived before the call timeout elapsed
    #[error("Request timed out")]
    CallTimedOut { method: String, timeout: Duration },

    /// The remote side answered with an error string (carried verbatim)
    #[error("{0}")]
    RemoteError(String),

    /// The session was torn down
    #[error("Session closed")]
    SessionClosed,

    /// Inbound request turned away because the session's request backlog is full
    #[error("Method '{method}' rejected: {limit} requests already in flight")]
    Overloaded { method: String, limit: usize },

    /// Inbound request for a method nobody registered
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    /// Response for an id that is not pending (expired, answered, or never sent)
    #[error("Unknown request id '{0}'")]
    UnknownCorrelationId(String),

    /// Transport failed to carry a frame
    #[error("transport error: {0}")]
    Transport(String),

    /// Role started with an unusable configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RpcError {
    /// True for failures that concern one call only and leave the session usable.
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            RpcError::ArityMismatch { .. }
                | RpcError::ParameterTypeMismatch { .. }
                | RpcError::ReturnTypeMismatch { .. }
                | RpcError::Encode { .. }
                | RpcError::CallTimedOut { .. }
                | RpcError::RemoteError(_)
                | RpcError::UnknownMethod(_)
                | RpcError::Overloaded { .. }
        )
    }
}

/// Transport-level failure reported by a [`FrameSink`](crate::ports::FrameSink).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("bind failed: {0}")]
    BindFailed(String),
    #[error("already connected")]
    AlreadyConnected,
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => RpcError::SessionClosed,
            other => RpcError::Transport(other.to_string()),
        }
    }
}

/// Several independent failures raised by one handler.
///
/// When rendered into an error response, nested aggregates are flattened and an
/// aggregate holding exactly one cause is replaced by that cause.
pub struct AggregateError {
    errors: Vec<anyhow::Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<anyhow::Error>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// Leaf causes, with nested aggregates expanded in place.
    pub fn flatten(&self) -> Vec<&anyhow::Error> {
        let mut leaves = Vec::new();
        for error in &self.errors {
            match error.downcast_ref::<AggregateError>() {
                Some(nested) => leaves.extend(nested.flatten()),
                None => leaves.push(error),
            }
        }
        leaves
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leaves = self.flatten();
        write!(f, "{} errors occurred", leaves.len())?;
        for (i, error) in leaves.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{error}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{self}")?;
        for (i, error) in self.flatten().iter().enumerate() {
            writeln!(f, "  [{i}] {error:?}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Render a handler failure for an error response.
///
/// Short mode uses `Display` of the (collapsed) error; verbose mode uses the
/// `Debug` rendering, which for `anyhow::Error` includes the cause chain.
pub fn render_failure(error: &anyhow::Error, verbose: bool) -> String {
    let collapsed = match error.downcast_ref::<AggregateError>() {
        Some(aggregate) => match aggregate.flatten().as_slice() {
            [single] => *single,
            _ => error,
        },
        None => error,
    };

    if verbose {
        format!("{collapsed:?}")
    } else {
        collapsed.to_string()
    }
}
