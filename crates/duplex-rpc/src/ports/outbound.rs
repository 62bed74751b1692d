//! Outbound port: where encoded frames go.

use crate::domain::error::TransportError;
use async_trait::async_trait;

/// Transport write side for one connection.
///
/// One call carries exactly one application-level frame. The processor
/// serializes calls, so implementations never see two writes in flight for
/// the same session.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send a single text frame
    async fn send_frame(&self, frame: String) -> Result<(), TransportError>;

    /// Close the underlying connection, optionally with a reason
    async fn close(&self, _reason: Option<String>) -> Result<(), TransportError> {
        Ok(())
    }
}
